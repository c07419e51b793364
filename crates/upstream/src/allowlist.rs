//! Host allow-list for outbound requests.

use reqwest::Url;

/// Hosts that outbound requests may reach.
///
/// An entry `example.com` permits `example.com` and any subdomain such as
/// `data.example.com`, but not `badexample.com`. Matching is case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct HostAllowList {
    hosts: Vec<String>,
}

impl HostAllowList {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn permits_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.hosts.iter().any(|allowed| {
            host == *allowed
                || (host.len() > allowed.len()
                    && host.ends_with(allowed.as_str())
                    && host.as_bytes()[host.len() - allowed.len() - 1] == b'.')
        })
    }

    /// Only http(s) URLs with a permitted host pass.
    pub fn permits(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
            && url.host_str().map(|h| self.permits_host(h)).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_exact_and_subdomain_match() {
        let list = HostAllowList::new(["earthdata.nasa.gov", "127.0.0.1"]);
        assert!(list.permits(&url("https://earthdata.nasa.gov/x")));
        assert!(list.permits(&url("https://cmr.earthdata.nasa.gov/search")));
        assert!(list.permits(&url("http://127.0.0.1:8080/a.tif")));
        assert!(!list.permits(&url("https://evilearthdata.nasa.gov.attacker.io/")));
        assert!(!list.permits(&url("https://notearthdata.nasa.gov/")));
    }

    #[test]
    fn test_scheme_and_empty_list() {
        let list = HostAllowList::new(["example.com"]);
        assert!(!list.permits(&url("ftp://example.com/file")));
        assert!(!HostAllowList::default().permits(&url("https://example.com/")));
    }

    #[test]
    fn test_case_insensitive() {
        let list = HostAllowList::new([".Data.Example.COM"]);
        assert!(list.permits_host("data.example.com"));
        assert!(list.permits_host("X.DATA.example.com"));
    }
}
