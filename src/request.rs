//! Incoming HTTP request type.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use percent_encoding::percent_decode_str;

/// An incoming HTTP request with its body fully collected.
///
/// This is the transport-level handle stored under [`REQUEST`](crate::REQUEST).
/// Cloning is cheap: the body is reference-counted.
#[derive(Clone, Debug, Default)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self { method, uri, headers, body, remote_addr: None }
    }

    /// Sets the address of the directly connected peer.
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Case-insensitive header lookup. Values that are not visible ASCII read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// First value of the query parameter `key`, percent-decoded.
    pub fn query(&self, key: &str) -> Option<String> {
        self.uri.query()?.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(k) == key).then(|| decode(v))
        })
    }

    /// Client address: the first valid IP in `X-Forwarded-For`, else the peer's IP.
    pub fn remote_ip(&self) -> Option<IpAddr> {
        self.forwarded_ips()
            .into_iter()
            .next()
            .or_else(|| self.remote_addr.map(|a| a.ip()))
    }

    /// Every syntactically valid address listed in `X-Forwarded-For`, in order.
    pub fn forwarded_ips(&self) -> Vec<IpAddr> {
        let Some(value) = self.header("x-forwarded-for") else {
            return Vec::new();
        };
        value
            .split(',')
            .filter_map(|candidate| candidate.trim().parse().ok())
            .collect()
    }
}

// Form-style decoding: `+` is a space.
fn decode(s: &str) -> String {
    let s = s.replace('+', " ");
    percent_decode_str(&s).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, headers: &[(&'static str, &str)]) -> Request {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(*name, value.parse().unwrap());
        }
        Request::new(Method::GET, uri.parse().unwrap(), map, Bytes::new())
    }

    #[test]
    fn forwarded_for_skips_invalid_entries() {
        let req = request("/", &[("x-forwarded-for", "10.0.0.1, invalid, 10.0.0.2")])
            .with_remote_addr("192.168.1.5:443".parse().unwrap());
        assert_eq!(req.remote_ip(), Some("10.0.0.1".parse().unwrap()));
        assert_eq!(req.forwarded_ips().len(), 2);
    }

    #[test]
    fn forwarded_for_accepts_ipv6() {
        let req = request("/", &[("x-forwarded-for", "bogus, ::1")]);
        assert_eq!(req.remote_ip(), Some("::1".parse().unwrap()));
    }

    #[test]
    fn falls_back_to_peer() {
        let req = request("/", &[]).with_remote_addr("192.168.1.5:443".parse().unwrap());
        assert_eq!(req.remote_ip(), Some("192.168.1.5".parse().unwrap()));

        let req = request("/", &[("x-forwarded-for", "nope")])
            .with_remote_addr("192.168.1.5:443".parse().unwrap());
        assert_eq!(req.remote_ip(), Some("192.168.1.5".parse().unwrap()));
    }

    #[test]
    fn no_peer_and_no_header() {
        assert_eq!(request("/", &[]).remote_ip(), None);
    }

    #[test]
    fn query_decodes_and_returns_first() {
        let req = request("/search?q=hello+world&tag=a%2Fb&q=second&flag", &[]);
        assert_eq!(req.query("q").as_deref(), Some("hello world"));
        assert_eq!(req.query("tag").as_deref(), Some("a/b"));
        assert_eq!(req.query("flag").as_deref(), Some(""));
        assert_eq!(req.query("missing"), None);
    }

    #[test]
    fn header_is_case_insensitive() {
        let req = request("/", &[("authorization", "token")]);
        assert_eq!(req.header("Authorization"), Some("token"));
        assert_eq!(req.header("x-missing"), None);
    }
}
