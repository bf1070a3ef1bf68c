use std::sync::atomic::{AtomicU64, Ordering};

use shared::domain::UserId;

/// Ordered form/query parameters.
pub type FormParams = Vec<(String, String)>;

pub fn form_params<const N: usize>(pairs: [(&str, &str); N]) -> FormParams {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Attaches the caller's identity and freshness tokens to a signed request.
/// Every call advances a per-session counter.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, user_id: &UserId, params: &mut FormParams);
}

/// Signer fed with the anti-forgery tokens scraped at sign-in.
pub struct FormMetaSigner {
    dtsg: String,
    revision: String,
    ttstamp: String,
    counter: AtomicU64,
}

impl FormMetaSigner {
    pub fn new(dtsg: impl Into<String>, revision: impl Into<String>) -> Self {
        let dtsg = dtsg.into();
        let ttstamp = ttstamp_for(&dtsg);
        Self {
            dtsg,
            revision: revision.into(),
            ttstamp,
            counter: AtomicU64::new(1),
        }
    }

    pub fn requests_signed(&self) -> u64 {
        self.counter.load(Ordering::SeqCst) - 1
    }
}

impl RequestSigner for FormMetaSigner {
    fn sign(&self, user_id: &UserId, params: &mut FormParams) {
        let request = self.counter.fetch_add(1, Ordering::SeqCst);
        params.extend([
            ("__user".to_string(), user_id.0.clone()),
            ("__req".to_string(), to_base36(request)),
            ("__rev".to_string(), self.revision.clone()),
            ("__a".to_string(), "1".to_string()),
            ("__af".to_string(), "h0".to_string()),
            ("__be".to_string(), "-1".to_string()),
            ("fb_dtsg".to_string(), self.dtsg.clone()),
            ("ttstamp".to_string(), self.ttstamp.clone()),
        ]);
    }
}

fn ttstamp_for(dtsg: &str) -> String {
    let mut stamp: String = dtsg.bytes().map(|byte| byte.to_string()).collect();
    stamp.push('2');
    stamp
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".into();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}
