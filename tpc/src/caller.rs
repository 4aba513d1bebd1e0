/// Identity of the client issuing a request, as established by the connection layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Connection identifier, `<user>.<pid>:<connection>@<host>`
    pub tident: String,
    /// Host name of the client
    pub host: String,
    /// Security protocol the client authenticated with
    pub protocol: String,
}

impl Caller {
    pub fn new(tident: &str, host: &str, protocol: &str) -> Self {
        Self {
            tident: tident.to_string(),
            host: host.to_string(),
            protocol: protocol.to_string(),
        }
    }

    /// Origin tag binding a session to the client that created it: the connection identifier
    /// up to the first `:` followed by `@<host>`.
    ///
    /// ```
    /// use tpc::Caller;
    ///
    /// let caller = Caller::new("alice.4242:7@client", "client.example", "unix");
    /// assert_eq!(caller.origin(), "alice.4242@client.example");
    /// ```
    pub fn origin(&self) -> String {
        let name = self
            .tident
            .split_once(':')
            .map_or(self.tident.as_str(), |(name, _)| name);
        format!("{}@{}", name, self.host)
    }
}
