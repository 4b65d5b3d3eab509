//! The pluggable authentication layer.
//!
//! The server drives a challenge/response exchange between the client and an
//! [`AuthPlugin`] chosen per user by the [`IdentityProvider`]. A plugin is a
//! factory for [`AuthState`] objects; each state consumes one client message
//! per [`advance`] call and either replies with more challenge bytes or
//! settles the exchange.
//!
//! [`advance`]: AuthState::advance

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use sha1::{Digest, Sha1};

use crate::error::Error;

/// Plugins that issue no challenge still hand the client 20 bytes of filler,
/// because common clients insist on scrambling *something*.
const FILLER: [u8; 20] = [b'0'; 20];

/// Nonce bytes stick to ASCII letters and digits; MySQL Connector/J decodes
/// the nonce as ASCII and chokes on arbitrary bytes.
const SAFE_NONCE_CHARS: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

pub(crate) fn nonce() -> [u8; 20] {
    let mut rng = rand::thread_rng();
    let mut out = [0u8; 20];
    for b in out.iter_mut() {
        *b = SAFE_NONCE_CHARS[rng.gen_range(0..SAFE_NONCE_CHARS.len())];
    }
    out
}

fn sha1(chunks: &[&[u8]]) -> [u8; 20] {
    let mut h = Sha1::new();
    for c in chunks {
        h.update(c);
    }
    h.finalize().into()
}

fn xor20(a: &[u8], b: &[u8; 20]) -> [u8; 20] {
    let mut out = [0u8; 20];
    for (i, o) in out.iter_mut().enumerate() {
        *o = a.get(i).copied().unwrap_or(0) ^ b[i];
    }
    out
}

/// A user record, as supplied by an [`IdentityProvider`].
#[derive(Debug, Clone, Default)]
pub struct User {
    /// The account name.
    pub name: String,
    /// Name of the authentication plugin the server should use for this
    /// user; the provider's default plugin is used when unset.
    pub auth_plugin: Option<String>,
    /// Plugin-specific credential. For `mysql_native_password` this is
    /// `SHA1(SHA1(password))` (see [`native_password_auth_data`]); for
    /// `mysql_clear_password` it is the plaintext password.
    pub auth_data: Option<Vec<u8>>,
    /// A secondary credential, checked when `auth_data` does not match.
    /// Useful for zero-downtime password rotation.
    pub old_auth_data: Option<Vec<u8>>,
}

/// Compute the `mysql_native_password` stored credential for a password:
/// `SHA1(SHA1(password))`.
pub fn native_password_auth_data(password: &[u8]) -> Vec<u8> {
    sha1(&[&sha1(&[password])]).to_vec()
}

/// Everything a plugin gets to look at when advancing an exchange.
#[derive(Debug)]
pub struct AuthInfo<'a> {
    /// The username from the handshake response (or COM_CHANGE_USER).
    pub username: &'a str,
    /// The client's latest auth message.
    pub data: &'a [u8],
    /// The user record being authenticated.
    pub user: &'a User,
    /// Connection attributes the client sent, if any.
    pub connect_attrs: &'a [(String, String)],
}

/// The outcome of one exchange step.
#[derive(Debug)]
pub enum Decision {
    /// Send these bytes to the client as an auth-more-data packet and feed
    /// its reply back into [`AuthState::advance`].
    Challenge(Vec<u8>),
    /// Authentication succeeded; the string is the authenticated identity.
    Accept(String),
    /// Authentication failed.
    Reject(Option<String>),
}

/// Per-exchange plugin state.
#[async_trait]
pub trait AuthState: Send {
    /// Consume one client message and decide how the exchange continues.
    async fn advance(&mut self, info: AuthInfo<'_>) -> Result<Decision, Error>;
}

/// A server-side authentication plugin.
pub trait AuthPlugin: Send + Sync {
    /// The plugin name advertised to clients.
    fn name(&self) -> &str;

    /// The client-side plugin this plugin converses with, if it only speaks
    /// to one (`None` accepts any client plugin).
    fn client_plugin_name(&self) -> Option<&str> {
        Some(self.name())
    }

    /// Begin an exchange: the initial plugin data (sent in the greeting or
    /// an auth-switch-request) and the state that will consume the client's
    /// reply.
    fn start(&self) -> (Vec<u8>, Box<dyn AuthState>);
}

/// `mysql_native_password`: the client proves knowledge of the password via
/// `SHA1(password) XOR SHA1(nonce || SHA1(SHA1(password)))`, so neither the
/// password nor the stored hash ever crosses the wire.
#[derive(Debug, Default)]
pub struct NativePasswordPlugin;

impl NativePasswordPlugin {
    /// Verify a client scramble against a stored `SHA1(SHA1(password))`.
    pub fn verify(auth_data: &[u8], scramble: &[u8], nonce: &[u8]) -> bool {
        if auth_data.len() != 20 || scramble.len() != 20 {
            return false;
        }
        let mut stored = [0u8; 20];
        stored.copy_from_slice(auth_data);
        let with_nonce = sha1(&[nonce, &stored]);
        let rcvd_sha1_password = xor20(scramble, &with_nonce);
        sha1(&[&rcvd_sha1_password]) == stored
    }
}

struct NativePasswordState {
    nonce: [u8; 20],
}

#[async_trait]
impl AuthState for NativePasswordState {
    async fn advance(&mut self, info: AuthInfo<'_>) -> Result<Decision, Error> {
        let user = info.user;
        // empty password quickpath: no scramble and no stored hash
        let ok = (info.data.is_empty()
            && user.auth_data.as_deref().map_or(true, |d| d.is_empty()))
            || user
                .auth_data
                .as_deref()
                .map_or(false, |d| NativePasswordPlugin::verify(d, info.data, &self.nonce))
            || user
                .old_auth_data
                .as_deref()
                .map_or(false, |d| NativePasswordPlugin::verify(d, info.data, &self.nonce));
        if ok {
            Ok(Decision::Accept(user.name.clone()))
        } else {
            Ok(Decision::Reject(None))
        }
    }
}

impl AuthPlugin for NativePasswordPlugin {
    fn name(&self) -> &str {
        "mysql_native_password"
    }

    fn start(&self) -> (Vec<u8>, Box<dyn AuthState>) {
        let nonce = nonce();
        (nonce.to_vec(), Box::new(NativePasswordState { nonce }))
    }
}

/// `mysql_clear_password`: the client sends the password in the clear
/// (trailing NUL included), trusting the transport for confidentiality.
#[derive(Debug, Default)]
pub struct ClearPasswordPlugin;

struct ClearPasswordState;

#[async_trait]
impl AuthState for ClearPasswordState {
    async fn advance(&mut self, info: AuthInfo<'_>) -> Result<Decision, Error> {
        // the trailing null is part of the protocol, not of the password
        let password = info.data.strip_suffix(b"\0").unwrap_or(info.data);
        let ok = match info.user.auth_data.as_deref() {
            Some(stored) => stored == password,
            // no credential on record: the provider vouched for the user
            None => true,
        };
        if ok {
            Ok(Decision::Accept(info.user.name.clone()))
        } else {
            Ok(Decision::Reject(None))
        }
    }
}

impl AuthPlugin for ClearPasswordPlugin {
    fn name(&self) -> &str {
        "mysql_clear_password"
    }

    fn start(&self) -> (Vec<u8>, Box<dyn AuthState>) {
        (FILLER.to_vec(), Box::new(ClearPasswordState))
    }
}

/// `mysql_no_login`: rejects every direct login. Useful for accounts that
/// may only be reached by proxy authentication.
#[derive(Debug, Default)]
pub struct NoLoginPlugin;

struct NoLoginState;

#[async_trait]
impl AuthState for NoLoginState {
    async fn advance(&mut self, _info: AuthInfo<'_>) -> Result<Decision, Error> {
        Ok(Decision::Reject(None))
    }
}

impl AuthPlugin for NoLoginPlugin {
    fn name(&self) -> &str {
        "mysql_no_login"
    }

    fn client_plugin_name(&self) -> Option<&str> {
        None
    }

    fn start(&self) -> (Vec<u8>, Box<dyn AuthState>) {
        (FILLER.to_vec(), Box::new(NoLoginState))
    }
}

/// One step of a GSSAPI accept-security-context loop.
#[derive(Debug)]
pub struct GssStep {
    /// Token to forward to the client (may be empty).
    pub token: Vec<u8>,
    /// Whether the context is established.
    pub done: bool,
    /// The authenticated principal, available once `done`.
    pub identity: Option<String>,
}

/// A single GSSAPI token exchange. Created per connection attempt.
#[async_trait]
pub trait GssExchange: Send {
    /// Feed one client token into the security context.
    async fn step(&mut self, client_token: &[u8]) -> Result<GssStep, Error>;
}

/// Factory for [`GssExchange`] instances, typically backed by a keytab.
#[async_trait]
pub trait GssAcceptor: Send + Sync {
    /// Start accepting a new security context.
    async fn accept(&self) -> Result<Box<dyn GssExchange>, Error>;
}

/// `authentication_kerberos`: announces the service principal, then
/// opaquely shuttles GSSAPI tokens between the client and a [`GssAcceptor`].
///
/// https://www.rfc-editor.org/rfc/rfc1964.html
pub struct KerberosPlugin {
    service: String,
    realm: String,
    acceptor: Arc<dyn GssAcceptor>,
}

impl KerberosPlugin {
    /// Create a plugin serving `service@realm` through `acceptor`.
    pub fn new(
        service: impl Into<String>,
        realm: impl Into<String>,
        acceptor: Arc<dyn GssAcceptor>,
    ) -> Self {
        KerberosPlugin {
            service: service.into(),
            realm: realm.into(),
            acceptor,
        }
    }

    fn announcement(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend((self.service.len() as u16).to_le_bytes());
        out.extend(self.service.as_bytes());
        out.extend((self.realm.len() as u16).to_le_bytes());
        out.extend(self.realm.as_bytes());
        out
    }
}

enum KerberosPhase {
    Announce,
    Exchange(Box<dyn GssExchange>),
}

struct KerberosState {
    announcement: Vec<u8>,
    acceptor: Arc<dyn GssAcceptor>,
    phase: KerberosPhase,
}

#[async_trait]
impl AuthState for KerberosState {
    async fn advance(&mut self, info: AuthInfo<'_>) -> Result<Decision, Error> {
        match &mut self.phase {
            KerberosPhase::Announce => {
                // fast authentication is not supported; the exchange starts
                // with the service/realm announcement
                let exchange = self.acceptor.accept().await?;
                self.phase = KerberosPhase::Exchange(exchange);
                Ok(Decision::Challenge(self.announcement.clone()))
            }
            KerberosPhase::Exchange(ex) => {
                let step = ex.step(info.data).await?;
                if !step.done {
                    return Ok(Decision::Challenge(step.token));
                }
                let identity = match step.identity {
                    Some(id) => id,
                    None => {
                        return Err(Error::Internal(
                            "GSSAPI context established without an initiator name".into(),
                        ))
                    }
                };
                // the principal is "user@REALM"; clients log in with the bare user
                let bare = identity.split('@').next().unwrap_or(&identity);
                if !info.username.is_empty() && info.username != bare {
                    return Ok(Decision::Reject(Some(format!(
                        "username '{}' does not match kerberos principal '{}'",
                        info.username, identity
                    ))));
                }
                Ok(Decision::Accept(bare.to_string()))
            }
        }
    }
}

impl AuthPlugin for KerberosPlugin {
    fn name(&self) -> &str {
        "authentication_kerberos"
    }

    fn client_plugin_name(&self) -> Option<&str> {
        Some("authentication_kerberos_client")
    }

    fn start(&self) -> (Vec<u8>, Box<dyn AuthState>) {
        (
            Vec::new(),
            Box::new(KerberosState {
                announcement: self.announcement(),
                acceptor: Arc::clone(&self.acceptor),
                phase: KerberosPhase::Announce,
            }),
        )
    }
}

/// Decides which users exist and which plugins authenticate them.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The plugins this server offers. Must be non-empty; the first entry is
    /// the default plugin used in the greeting.
    fn plugins(&self) -> Vec<Arc<dyn AuthPlugin>>;

    /// Look up a user record by the name the client presented.
    async fn get_user(&self, username: &str) -> Result<Option<User>, Error>;

    /// The plugin advertised in the server greeting.
    fn default_plugin(&self) -> Option<Arc<dyn AuthPlugin>> {
        self.plugins().into_iter().next()
    }

    /// Find a plugin by name.
    fn plugin(&self, name: &str) -> Option<Arc<dyn AuthPlugin>> {
        self.plugins().into_iter().find(|p| p.name() == name)
    }
}

/// An identity provider that accepts any username with any (empty) password
/// through `mysql_native_password`. Useful for tests and for embedders that
/// do their own authorization at the query layer.
#[derive(Debug, Default)]
pub struct SimpleIdentityProvider;

#[async_trait]
impl IdentityProvider for SimpleIdentityProvider {
    fn plugins(&self) -> Vec<Arc<dyn AuthPlugin>> {
        vec![Arc::new(NativePasswordPlugin), Arc::new(NoLoginPlugin)]
    }

    async fn get_user(&self, username: &str) -> Result<Option<User>, Error> {
        Ok(Some(User {
            name: username.to_string(),
            auth_plugin: Some("mysql_native_password".to_string()),
            ..User::default()
        }))
    }
}
