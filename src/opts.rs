//! Connection options.

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::Error;

/// Default cap on frames a single read loop accepts. See [`Opts::message_limit`].
pub const DEFAULT_MESSAGE_LIMIT: usize = 10_000;

/// Connection options for PostgreSQL.
#[derive(Clone)]
pub struct Opts {
    /// Hostname or IP address.
    ///
    /// Default: `""`
    pub host: String,

    /// Port number for the PostgreSQL server.
    ///
    /// Default: `5432`
    pub port: u16,

    /// Unix socket path. Takes precedence over `host`.
    ///
    /// Default: `None`
    pub socket: Option<String>,

    /// Username for authentication.
    ///
    /// Default: `""`
    pub user: String,

    /// Database name to use. The server defaults it to the user name.
    ///
    /// Default: `None`
    pub database: Option<String>,

    /// Password for cleartext, MD5 or SCRAM-SHA-256 authentication.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Application name to report to the server.
    ///
    /// Default: `None`
    pub application_name: Option<String>,

    /// Additional startup parameters, sent in order.
    ///
    /// Default: `[]`
    pub params: Vec<(String, String)>,

    /// Maximum number of frames one operation may read before giving up with
    /// [`Error::LoopExhausted`]. DataRow frames are not counted.
    ///
    /// Default: `10000`
    pub message_limit: usize,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5432,
            socket: None,
            user: String::new(),
            database: None,
            password: None,
            application_name: None,
            params: Vec::new(),
            message_limit: DEFAULT_MESSAGE_LIMIT,
        }
    }
}

impl std::fmt::Debug for Opts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Opts")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("socket", &self.socket)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("application_name", &self.application_name)
            .field("params", &self.params)
            .field("message_limit", &self.message_limit)
            .finish()
    }
}

impl Opts {
    /// Startup parameters in the order they are sent.
    pub(crate) fn startup_params(&self) -> Vec<(&str, &str)> {
        let mut params = vec![("user", self.user.as_str()), ("client_encoding", "UTF8")];
        if let Some(database) = &self.database {
            params.push(("database", database));
        }
        if let Some(app) = &self.application_name {
            params.push(("application_name", app));
        }
        for (name, value) in &self.params {
            params.push((name, value));
        }
        params
    }
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Parse a PostgreSQL connection URL.
    ///
    /// Format: `postgres://[user[:password]@]host[:port][/database][?param1=value1&..]`
    ///
    /// Recognized query parameters:
    /// - `application_name`: application name
    /// - `message_limit`: read-loop cap (positive integer)
    ///
    /// Any other parameter is sent as a startup parameter.
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if !["postgres", "postgresql", "pg"].contains(&url.scheme()) {
            return Err(Error::InvalidUsage(format!(
                "Invalid scheme: expected 'postgres://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = Opts {
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().unwrap_or(5432),
            user: decode(url.username(), "user")?,
            password: url.password().map(|s| decode(s, "password")).transpose()?,
            database: url
                .path()
                .strip_prefix('/')
                .filter(|s| !s.is_empty())
                .map(|s| decode(s, "database"))
                .transpose()?,
            ..Opts::default()
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "application_name" => {
                    opts.application_name = Some(value.to_string());
                }
                "message_limit" => {
                    opts.message_limit = value
                        .parse()
                        .ok()
                        .filter(|&limit: &usize| limit > 0)
                        .ok_or_else(|| {
                            Error::InvalidUsage(format!("Invalid message_limit: {}", value))
                        })?;
                }
                _ => {
                    opts.params.push((key.to_string(), value.to_string()));
                }
            }
        }

        Ok(opts)
    }
}

/// `Url` leaves userinfo and path percent-encoded.
fn decode(component: &str, what: &str) -> Result<String, Error> {
    percent_decode_str(component)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| Error::InvalidUsage(format!("Invalid {what} in URL: {e}")))
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let url = Url::parse(s).map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
        Self::try_from(&url)
    }
}
