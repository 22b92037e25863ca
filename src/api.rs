use std::time;
use surf;
use std::collections::HashMap;
use surf::http::Method;
use super::health::Health;

/// Client provides a client to the Consul API
#[derive(Default, Debug, Clone)]
#[allow(non_snake_case)]
pub struct Client {
    // pub headers: Option<http_types::Headers>,
    pub config: Config
}

impl Client {
    pub fn new(config: Config) -> Self {
        Client { config }
    }

    /// Builds the `Health` endpoint handle for this client (the only
    /// Consul endpoint group this crate still drives — see C6 in
    /// SPEC_FULL.md's component table).
    pub fn health(self) -> Health {
        Health::new(self)
    }
}

/// Config is used to configure the creation of a client. Fields are owned
/// `String`s rather than the teacher's `&'static str` so a `Config` can be
/// assembled at runtime from a loaded TOML/YAML file (SPEC_FULL.md §6).
#[derive(Default, Debug, Clone)]
#[allow(non_snake_case)]
pub struct Config {
    /// Address is the address of the Consul server
    pub Address: String,

    /// Scheme is the URI scheme for the Consul server
    pub Scheme: String,

    /// Datacenter to use. If not provided, the default agent datacenter is used.
    pub Datacenter: String,

    /// Transport is the Transport to use for the http client.
    /// pub Transport: surf::Client,
    /// HttpClient is the client to use. Default will be
    /// used if not provided.
    /// pub HttpClient: Option<surf::Client>,

    /// HttpAuth is the auth info to use for http access.

    /// pub HttpAuth: Option<http_types::auth::BasicAuth>,

    /// WaitTime limits how long a Watch will block. If not provided,
    /// the agent default values will be used.
    pub WaitTime: time::Duration,

    /// Token is used to provide a per-request ACL token
    /// which overrides the agent's default token.
    pub Token: String,

    /// TokenFile is a file containing the current token to use for this client.
    /// If provided it is read once at startup and never again.
    pub TokenFile: String,

    /// Namespace is the name of the namespace to send along with requests
    /// when the health endpoint doesn't override it per-call.
    pub Namespace: String,
}

/// newRequest is used to create a new request
///
/// Generalized from the original: Consul's blocking queries are plain GETs
/// with query-string parameters, never a JSON body, so config-level
/// defaults (`dc`, `ns`, `wait`) are applied through `set_query`, and the
/// ACL token travels as the `X-Consul-Token` header rather than a body field.
impl Client {
    pub async fn new_request(self, method: Method, path: String) -> surf::Result<surf::Request> {
        let url = format!("{}{}", self.config.Address, path);
        let uri = surf::Url::parse(&url)?;
        let mut req = surf::Request::new(method, uri);

        let mut query: HashMap<&str, String> = HashMap::new();

        if !self.config.Datacenter.is_empty() {
            query.insert("dc", self.config.Datacenter.clone());
        };
        if !self.config.Namespace.is_empty() {
            query.insert("ns", self.config.Namespace.clone());
        };

        if self.config.WaitTime.as_secs() > 0 {
            query.insert("wait", format!("{}s", self.config.WaitTime.as_secs()));
        };

        if !query.is_empty() {
            req.set_query(&query)?;
        }

        if !self.config.Token.is_empty() {
            req.insert_header("X-Consul-Token", self.config.Token.as_str());
        };

        Ok(req)
    }

}
