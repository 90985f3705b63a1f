//! Request identity used as the store entry key.

use sha2::{Digest, Sha256};
use url::Url;

/// Compute the store key for a request.
///
/// The identity is the upper-cased method and the full URL including its
/// query. Fragments never reach the network and are dropped.
pub fn entry_key(method: &str, url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);

    let mut hasher = Sha256::new();
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_str().as_bytes());
    hex::encode(hasher.finalize())
}
