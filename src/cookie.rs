//! §6 `CookieJar`: `loadForRequest`/`saveFromResponse`. Both must return
//! quickly and be safe for concurrent invocation.

use std::{fmt, sync::Arc};

use http::HeaderValue;
use url::Url;

/// A pluggable cookie store. The core ships [`Jar`], an in-memory reference
/// implementation; persistence is explicitly a Non-goal (§1) left to a
/// downstream collaborator.
pub trait CookieJar: Send + Sync {
    fn load_for_request(&self, url: &Url) -> Vec<HeaderValue>;
    fn save_from_response(&self, url: &Url, cookies: Vec<HeaderValue>);
}

impl fmt::Debug for dyn CookieJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn CookieJar")
    }
}

#[cfg(feature = "cookies")]
mod imp {
    use super::*;
    use cookie_store::CookieStore;
    use std::sync::Mutex;

    /// An in-memory cookie jar backed by `cookie_store`.
    pub struct Jar(Mutex<CookieStore>);

    impl Jar {
        pub fn new() -> Arc<Self> {
            Arc::new(Jar(Mutex::new(CookieStore::default())))
        }
    }

    impl Default for Jar {
        fn default() -> Self {
            Jar(Mutex::new(CookieStore::default()))
        }
    }

    impl CookieJar for Jar {
        fn load_for_request(&self, url: &Url) -> Vec<HeaderValue> {
            let store = self.0.lock().unwrap();
            let value = store
                .get_request_values(url)
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            if value.is_empty() {
                Vec::new()
            } else {
                HeaderValue::from_str(&value).ok().into_iter().collect()
            }
        }

        fn save_from_response(&self, url: &Url, cookies: Vec<HeaderValue>) {
            let mut store = self.0.lock().unwrap();
            for raw in cookies {
                if let Ok(s) = raw.to_str() {
                    if let Ok(cookie) = cookie_crate::Cookie::parse(s.to_owned()) {
                        let _ = store.insert_raw(&cookie, url);
                    }
                }
            }
        }
    }

    impl fmt::Debug for Jar {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("Jar")
        }
    }
}

#[cfg(feature = "cookies")]
pub use imp::Jar;

/// Never stores or sends cookies; the zero-config default when the
/// `cookies` feature is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCookieJar;

impl CookieJar for NoCookieJar {
    fn load_for_request(&self, _url: &Url) -> Vec<HeaderValue> {
        Vec::new()
    }

    fn save_from_response(&self, _url: &Url, _cookies: Vec<HeaderValue>) {}
}
