//! Credential Generator
//!
//! Produces the full credential bundle for one client profile and
//! renders the AmneziaWG INI document handed to the user. The store
//! only sees the [`ProfileBuilder`] trait, never the settings behind it.

use crate::config::WgConfig;
use crate::keys::{KeyPair, PresharedKey};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Generated keys and assigned address for one client profile
#[derive(Clone)]
pub struct Credentials {
    /// Client private key (base64)
    pub private_key: String,
    /// Client public key (base64)
    pub public_key: String,
    /// Preshared key (base64)
    pub preshared_key: String,
    /// Address assigned from the pool
    pub address: Ipv4Addr,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("public_key", &self.public_key)
            .field("address", &self.address)
            .finish()
    }
}

/// Key material plus rendered config text, ready to persist
#[derive(Debug, Clone)]
pub struct ProfileMaterial {
    pub private_key: String,
    pub public_key: String,
    pub preshared_key: String,
    pub config_text: String,
}

/// Builds the persisted material for a profile bound to one address.
///
/// Injected into the store's allocation and reissue transactions so the
/// transaction code never depends on server settings directly.
pub trait ProfileBuilder: Send + Sync {
    fn build(&self, address: Ipv4Addr) -> ProfileMaterial;
}

/// Generates WireGuard key material and renders client configs
#[derive(Debug, Clone)]
pub struct CredentialGenerator {
    config: Arc<WgConfig>,
}

impl CredentialGenerator {
    /// Create a generator bound to the given server settings
    pub fn new(config: Arc<WgConfig>) -> Self {
        Self { config }
    }

    /// Server settings this generator renders against
    pub fn config(&self) -> &WgConfig {
        &self.config
    }

    /// Generate a fresh credential bundle for `address`
    pub fn generate(&self, address: Ipv4Addr) -> Credentials {
        let keypair = KeyPair::generate();
        let preshared = PresharedKey::generate();

        Credentials {
            private_key: keypair.private.to_base64(),
            public_key: keypair.public.to_base64(),
            preshared_key: preshared.to_base64(),
            address,
        }
    }

    /// Render the client-facing INI config for `credentials`.
    ///
    /// Deterministic: same credentials and settings always produce the
    /// same text. Obfuscation values are formatted verbatim.
    pub fn render_config(&self, credentials: &Credentials) -> String {
        let cfg = &self.config;
        let obf = &cfg.obfuscation;

        format!(
            "[Interface]\n\
             PrivateKey = {private_key}\n\
             Address = {address}/32\n\
             DNS = {dns}\n\
             JunkPacketCount = {junk_count}\n\
             JunkPacketMinSize = {junk_min}\n\
             JunkPacketMaxSize = {junk_max}\n\
             InitPacketJunkSize = {init_junk}\n\
             ResponsePacketJunkSize = {resp_junk}\n\
             UnderloadPacketJunkSize = {underload_junk}\n\
             TransportPacketMagic = {magic}\n\
             \n\
             [Peer]\n\
             PublicKey = {server_key}\n\
             PresharedKey = {preshared_key}\n\
             Endpoint = {host}:{port}\n\
             AllowedIPs = {allowed}\n\
             PersistentKeepalive = {keepalive}\n",
            private_key = credentials.private_key,
            address = credentials.address,
            dns = cfg.dns_list(),
            junk_count = obf.junk_packet_count,
            junk_min = obf.junk_packet_min_size,
            junk_max = obf.junk_packet_max_size,
            init_junk = obf.init_packet_junk_size,
            resp_junk = obf.response_packet_junk_size,
            underload_junk = obf.underload_packet_junk_size,
            magic = obf.transport_packet_magic,
            server_key = cfg.server_public_key,
            preshared_key = credentials.preshared_key,
            host = cfg.endpoint_host,
            port = cfg.endpoint_port,
            allowed = cfg.allowed_ips_list(),
            keepalive = cfg.persistent_keepalive,
        )
    }
}

impl ProfileBuilder for CredentialGenerator {
    fn build(&self, address: Ipv4Addr) -> ProfileMaterial {
        let credentials = self.generate(address);
        let config_text = self.render_config(&credentials);

        ProfileMaterial {
            private_key: credentials.private_key,
            public_key: credentials.public_key,
            preshared_key: credentials.preshared_key,
            config_text,
        }
    }
}
