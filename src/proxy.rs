use http::Uri;
use http::header::HeaderValue;
use url::Url;

use crate::Result;
use crate::error::Error;
use crate::util::{default_port, parse_header_value, parse_uri};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyConfig {
    uri: Uri,
    authorization: Option<HeaderValue>,
}

impl ProxyConfig {
    pub fn new(uri: Uri) -> Self {
        Self {
            uri,
            authorization: None,
        }
    }

    pub fn parse(uri: &str) -> Result<Self> {
        Ok(Self::new(parse_uri(uri)?))
    }

    pub fn with_authorization(mut self, mut authorization: HeaderValue) -> Self {
        authorization.set_sensitive(true);
        self.authorization = Some(authorization);
        self
    }

    pub fn try_with_authorization(self, authorization: &str) -> Result<Self> {
        let value = parse_header_value("proxy-authorization", authorization)?;
        Ok(self.with_authorization(value))
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn authorization(&self) -> Option<&HeaderValue> {
        self.authorization.as_ref()
    }
}

/// Chooses the proxy for one destination. Consulted on every attempt, so a
/// redirect to another host can change the route.
pub trait ProxySelector: Send + Sync {
    fn select(&self, uri: &Uri) -> Option<ProxyConfig>;
}

impl<F> ProxySelector for F
where
    F: Fn(&Uri) -> Option<ProxyConfig> + Send + Sync,
{
    fn select(&self, uri: &Uri) -> Option<ProxyConfig> {
        self(uri)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DirectProxySelector;

impl ProxySelector for DirectProxySelector {
    fn select(&self, _uri: &Uri) -> Option<ProxyConfig> {
        None
    }
}

#[derive(Clone, Debug)]
pub struct StaticProxySelector {
    proxy: ProxyConfig,
    no_proxy_rules: Vec<NoProxyRule>,
}

impl StaticProxySelector {
    pub fn new(proxy: ProxyConfig) -> Self {
        Self {
            proxy,
            no_proxy_rules: Vec::new(),
        }
    }

    pub fn no_proxy<I, S>(mut self, rules: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.no_proxy_rules.extend(parse_no_proxy_rules(rules)?);
        Ok(self)
    }
}

impl ProxySelector for StaticProxySelector {
    fn select(&self, uri: &Uri) -> Option<ProxyConfig> {
        if should_bypass_proxy_uri(&self.no_proxy_rules, uri) {
            return None;
        }
        Some(self.proxy.clone())
    }
}

/// Scheme-aware selector fed from `HTTP_PROXY`, `HTTPS_PROXY`, `ALL_PROXY`
/// and `NO_PROXY` (either case).
#[derive(Clone, Debug, Default)]
pub struct EnvProxySelector {
    http: Option<ProxyConfig>,
    https: Option<ProxyConfig>,
    no_proxy_rules: Vec<NoProxyRule>,
}

impl EnvProxySelector {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .or_else(|| lookup(&name.to_ascii_lowercase()))
                .filter(|value| !value.trim().is_empty())
        };
        let all = read("ALL_PROXY");
        let http = read("HTTP_PROXY").or_else(|| all.clone());
        let https = read("HTTPS_PROXY").or(all);

        let no_proxy_rules = match read("NO_PROXY") {
            Some(rules) => parse_no_proxy_rules(
                rules.split(',').map(str::trim).filter(|rule| !rule.is_empty()),
            )?,
            None => Vec::new(),
        };

        Ok(Self {
            http: http.as_deref().map(ProxyConfig::parse).transpose()?,
            https: https.as_deref().map(ProxyConfig::parse).transpose()?,
            no_proxy_rules,
        })
    }
}

impl ProxySelector for EnvProxySelector {
    fn select(&self, uri: &Uri) -> Option<ProxyConfig> {
        if should_bypass_proxy_uri(&self.no_proxy_rules, uri) {
            return None;
        }
        let is_https = uri
            .scheme_str()
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https"));
        if is_https {
            self.https.clone()
        } else {
            self.http.clone()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum NoProxyRule {
    Any,
    Domain { host: String, port: Option<u16> },
}

impl NoProxyRule {
    pub(crate) fn parse(text: &str) -> Option<Self> {
        let mut candidate = text.trim().to_owned();
        let mut port = None;
        if candidate.is_empty() {
            return None;
        }
        if candidate == "*" {
            return Some(Self::Any);
        }
        if let Ok(url) = Url::parse(&candidate)
            && let Some(host) = url.host_str()
        {
            candidate = host.to_owned();
            port = url.port();
        }
        candidate = candidate.trim_start_matches('.').to_owned();
        if candidate.is_empty() {
            return None;
        }
        if let Some(stripped) = candidate.strip_prefix('[') {
            let end = stripped.find(']')?;
            let host = &stripped[..end];
            let suffix = &stripped[end + 1..];
            if suffix.is_empty() {
                port = None;
            } else if let Some(raw_port) = suffix.strip_prefix(':') {
                port = Some(raw_port.parse::<u16>().ok()?);
            } else {
                return None;
            }
            candidate = host.to_owned();
        } else if candidate.matches(':').count() == 1 {
            let (host, raw_port) = candidate.rsplit_once(':')?;
            if host.is_empty() {
                return None;
            }
            port = Some(raw_port.parse::<u16>().ok()?);
            candidate = host.to_owned();
        }
        if candidate.is_empty() {
            return None;
        }
        Some(Self::Domain {
            host: candidate.to_ascii_lowercase(),
            port,
        })
    }

    pub(crate) fn matches(&self, host: &str, port: Option<u16>) -> bool {
        match self {
            Self::Any => true,
            Self::Domain {
                host: domain,
                port: rule_port,
            } => {
                let host_matches = host == domain || host.ends_with(&format!(".{domain}"));
                if !host_matches {
                    return false;
                }

                match rule_port {
                    Some(rule_port) => port == Some(*rule_port),
                    None => true,
                }
            }
        }
    }
}

pub(crate) fn should_bypass_proxy_uri(no_proxy_rules: &[NoProxyRule], uri: &Uri) -> bool {
    let Some(host) = uri.host() else {
        return false;
    };
    let normalized = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase();
    let port = default_port(uri);
    no_proxy_rules
        .iter()
        .any(|rule| rule.matches(&normalized, port))
}

fn parse_no_proxy_rules<I, S>(rules: I) -> Result<Vec<NoProxyRule>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    rules
        .into_iter()
        .map(|rule| {
            let rule = rule.as_ref();
            NoProxyRule::parse(rule).ok_or_else(|| Error::InvalidNoProxyRule {
                rule: rule.to_owned(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use http::Uri;

    use super::{
        EnvProxySelector, NoProxyRule, ProxyConfig, ProxySelector, StaticProxySelector,
    };

    fn uri(text: &str) -> Uri {
        text.parse().expect("uri should parse")
    }

    #[test]
    fn no_proxy_rule_parses_host_with_port() {
        assert_eq!(
            NoProxyRule::parse(".internal.example.com:8443"),
            Some(NoProxyRule::Domain {
                host: "internal.example.com".to_owned(),
                port: Some(8443),
            })
        );
        assert_eq!(NoProxyRule::parse("*"), Some(NoProxyRule::Any));
        assert_eq!(NoProxyRule::parse("   "), None);
    }

    #[test]
    fn static_selector_bypasses_matching_subdomains_only() {
        let selector =
            StaticProxySelector::new(ProxyConfig::parse("http://proxy.example.com:3128").expect("proxy"))
                .no_proxy(["corp.example.com"])
                .expect("rules");

        assert!(selector.select(&uri("https://vcd.corp.example.com/api")).is_none());
        let proxy = selector
            .select(&uri("https://vcd.example.net/api"))
            .expect("other hosts go through the proxy");
        assert_eq!(proxy.uri().host(), Some("proxy.example.com"));
        assert_eq!(proxy.uri().port_u16(), Some(3128));
    }

    #[test]
    fn env_selector_picks_proxy_by_scheme() {
        let variables = BTreeMap::from([
            ("http_proxy", "http://plain-proxy:8080"),
            ("HTTPS_PROXY", "http://tls-proxy:8443"),
            ("NO_PROXY", "localhost, 127.0.0.1"),
        ]);
        let selector = EnvProxySelector::from_lookup(|name| {
            variables.get(name).map(|value| (*value).to_owned())
        })
        .expect("env selector");

        assert_eq!(
            selector
                .select(&uri("http://vcd.example.com/"))
                .map(|proxy| proxy.uri().host().map(ToOwned::to_owned)),
            Some(Some("plain-proxy".to_owned()))
        );
        assert_eq!(
            selector
                .select(&uri("https://vcd.example.com/"))
                .map(|proxy| proxy.uri().host().map(ToOwned::to_owned)),
            Some(Some("tls-proxy".to_owned()))
        );
        assert!(selector.select(&uri("http://localhost:9000/")).is_none());
    }

    #[test]
    fn closures_select_per_destination() {
        let selector = |target: &Uri| {
            (target.host() == Some("vcd.example.com"))
                .then(|| ProxyConfig::new(uri("http://proxy.example.com:3128")))
        };
        assert!(selector.select(&uri("https://vcd.example.com/api")).is_some());
        assert!(selector.select(&uri("https://other.example.com/api")).is_none());
    }
}
