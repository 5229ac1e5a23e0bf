use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;

lazy_static! {
    /// The jar shared by every tab in the running browser. Tests construct
    /// their own jars instead of touching this one.
    pub static ref COOKIE_JAR: Arc<Mutex<CookieJar>> = Arc::new(Mutex::new(CookieJar::new()));
}

/// A single cookie: its value plus the lowercased parameters that came in on
/// the `Set-Cookie` line (`expires`, `httponly`, `samesite`, ...). Flag-style
/// parameters are stored with an empty value.
#[derive(Clone, Debug, PartialEq)]
pub struct Cookie {
    pub value: String,
    pub params: BTreeMap<String, String>,
}

impl Cookie {
    fn has_flag(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// True once the `expires` parameter lies in the past. Dates are RFC 1123
    /// or plain epoch seconds; anything unparsable never expires.
    fn expired(&self, now: DateTime<Utc>) -> bool {
        let Some(raw) = self.params.get("expires") else {
            return false;
        };
        let raw = raw.trim();
        let when = if let Ok(secs) = raw.parse::<i64>() {
            DateTime::from_timestamp(secs, 0)
        } else {
            DateTime::parse_from_rfc2822(raw)
                .ok()
                .map(|d| d.with_timezone(&Utc))
        };
        match when {
            Some(when) => when <= now,
            None => false,
        }
    }
}

/// Process-wide cookie store keyed by origin (`scheme://host:port`).
///
/// The jar is the only state shared across tabs; callers hold it behind an
/// `Arc<Mutex<_>>` and keep the critical sections short.
#[derive(Default)]
pub struct CookieJar {
    cookies: HashMap<String, BTreeMap<String, Cookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses one `Set-Cookie` header value into `(name, cookie)`.
    ///
    /// Only the first comma-separated segment is considered, which mangles
    /// `Expires` dates containing a comma; the behavior is inherited from the
    /// original and deliberately not corrected.
    fn parse_set_cookie(line: &str) -> Option<(String, Cookie)> {
        let segment = line.split(',').next().unwrap_or("");
        let mut parts = segment.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim().to_string();
        if name.is_empty() {
            return None;
        }
        let mut params = BTreeMap::new();
        for part in parts {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.split_once('=') {
                Some((k, v)) => {
                    params.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
                }
                None => {
                    params.insert(part.to_ascii_lowercase(), String::new());
                }
            }
        }
        Some((name, Cookie { value: value.trim().to_string(), params }))
    }

    /// Stores a cookie received over the network. A repeated name under the
    /// same origin overwrites the previous cookie.
    pub fn set_from_header(&mut self, origin: &str, line: &str) {
        if let Some((name, cookie)) = Self::parse_set_cookie(line) {
            self.cookies
                .entry(origin.to_string())
                .or_default()
                .insert(name, cookie);
        }
    }

    /// Stores a cookie written through `document.cookie`. Scripts may not
    /// create HttpOnly cookies and may not overwrite one; both writes are
    /// dropped silently.
    pub fn set_from_script(&mut self, origin: &str, line: &str) {
        let Some((name, cookie)) = Self::parse_set_cookie(line) else {
            return;
        };
        if cookie.has_flag("httponly") {
            return;
        }
        let jar = self.cookies.entry(origin.to_string()).or_default();
        if jar.get(&name).is_some_and(|old| old.has_flag("httponly")) {
            return;
        }
        jar.insert(name, cookie);
    }

    /// Builds the value of the `Cookie:` request header for a request to
    /// `origin`, or `None` when nothing applies.
    ///
    /// `initiator` is the origin of the site that caused the request;
    /// `SameSite=Lax` cookies are withheld from cross-site POSTs. Expired
    /// cookies are evicted as a side effect.
    pub fn request_header(
        &mut self,
        origin: &str,
        method: &str,
        initiator: Option<&str>,
    ) -> Option<String> {
        self.evict_expired(origin);
        let jar = self.cookies.get(origin)?;
        let cross_site = initiator.is_some_and(|r| r != origin);
        let pairs: Vec<String> = jar
            .iter()
            .filter(|(_, cookie)| {
                let lax = cookie
                    .params
                    .get("samesite")
                    .is_some_and(|v| v.eq_ignore_ascii_case("lax"));
                !(lax && method == "POST" && cross_site)
            })
            .map(|(name, cookie)| format!("{}={}", name, cookie.value))
            .collect();
        if pairs.is_empty() { None } else { Some(pairs.join("; ")) }
    }

    /// The string handed to scripts reading `document.cookie`. HttpOnly
    /// cookies never cross the boundary; expired ones are evicted first.
    pub fn script_string(&mut self, origin: &str) -> String {
        self.evict_expired(origin);
        let Some(jar) = self.cookies.get(origin) else {
            return String::new();
        };
        jar.iter()
            .filter(|(_, cookie)| !cookie.has_flag("httponly"))
            .map(|(name, cookie)| {
                let mut out = format!("{}={}", name, cookie.value);
                for (k, v) in &cookie.params {
                    if v.is_empty() {
                        out.push_str(&format!("; {}", k));
                    } else {
                        out.push_str(&format!("; {}={}", k, v));
                    }
                }
                out
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn get(&self, origin: &str, name: &str) -> Option<&Cookie> {
        self.cookies.get(origin)?.get(name)
    }

    pub fn remove(&mut self, origin: &str, name: &str) {
        if let Some(jar) = self.cookies.get_mut(origin) {
            jar.remove(name);
        }
    }

    fn evict_expired(&mut self, origin: &str) {
        let now = Utc::now();
        if let Some(jar) = self.cookies.get_mut(origin) {
            jar.retain(|_, cookie| !cookie.expired(now));
        }
    }
}
