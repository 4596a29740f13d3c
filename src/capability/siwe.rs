//! Minimal SIWE ("Sign-In with Ethereum", EIP-4361) message assembly and
//! parsing, extended with the `resources` list ReCap rides on (spec.md §6
//! "SIWE resource encoding").
//!
//! This is the wire text the external wallet signs (`AuthSig::signed_message`)
//! and the network's `/web/sign_session_key` endpoint signs on the PKP's
//! behalf. Only the fields the coordinator actually reads or writes are
//! modelled; full ABNF-level validation is out of scope (the wallet
//! callback / network, both external collaborators per spec.md §1, are the
//! ones responsible for producing a conformant message).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiweMessage {
    pub domain: String,
    pub address: String,
    pub statement: String,
    pub uri: String,
    pub version: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: String,
    pub expiration_time: String,
    pub resources: Vec<String>,
}

impl SiweMessage {
    /// Render the EIP-4361 text form that gets signed.
    pub fn to_text(&self) -> String {
        let mut out = format!(
            "{domain} wants you to sign in with your Ethereum account:\n{address}\n\n{statement}\n\nURI: {uri}\nVersion: {version}\nChain ID: {chain_id}\nNonce: {nonce}\nIssued At: {issued_at}\nExpiration Time: {expiration_time}",
            domain = self.domain,
            address = self.address,
            statement = self.statement,
            uri = self.uri,
            version = self.version,
            chain_id = self.chain_id,
            nonce = self.nonce,
            issued_at = self.issued_at,
            expiration_time = self.expiration_time,
        );
        if !self.resources.is_empty() {
            out.push_str("\nResources:");
            for resource in &self.resources {
                out.push_str(&format!("\n- {resource}"));
            }
        }
        out
    }

    /// Parse a message previously produced by `to_text`. Tolerant of a
    /// missing `Resources:` block (an AuthSig with no resources is still a
    /// structurally valid SIWE message — the re-sign predicate in
    /// `crate::session::wallet_sig` is what rejects it for *this* use).
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut lines = text.lines();
        let domain = lines
            .next()
            .and_then(|l| l.strip_suffix(" wants you to sign in with your Ethereum account:"))
            .ok_or_else(|| anyhow::anyhow!("missing domain line"))?
            .to_string();
        let address = lines
            .next()
            .ok_or_else(|| anyhow::anyhow!("missing address line"))?
            .to_string();

        let rest: Vec<&str> = lines.collect();
        // rest[0] is a blank separator line, statement follows, then a
        // blank line, then the field block.
        let field_start = rest
            .iter()
            .position(|l| l.starts_with("URI: "))
            .ok_or_else(|| anyhow::anyhow!("missing URI field"))?;
        let statement = rest[1..field_start.saturating_sub(1)].join("\n").trim().to_string();

        let mut uri = None;
        let mut version = None;
        let mut chain_id = None;
        let mut nonce = None;
        let mut issued_at = None;
        let mut expiration_time = None;
        let mut resources = Vec::new();
        let mut in_resources = false;

        for line in &rest[field_start..] {
            if in_resources {
                if let Some(resource) = line.strip_prefix("- ") {
                    resources.push(resource.to_string());
                    continue;
                }
            }
            if let Some(value) = line.strip_prefix("URI: ") {
                uri = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("Version: ") {
                version = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("Chain ID: ") {
                chain_id = Some(value.parse()?);
            } else if let Some(value) = line.strip_prefix("Nonce: ") {
                nonce = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("Issued At: ") {
                issued_at = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("Expiration Time: ") {
                expiration_time = Some(value.to_string());
            } else if line.starts_with("Resources:") {
                in_resources = true;
            }
        }

        Ok(Self {
            domain,
            address,
            statement,
            uri: uri.ok_or_else(|| anyhow::anyhow!("missing URI"))?,
            version: version.unwrap_or_else(|| "1".to_string()),
            chain_id: chain_id.ok_or_else(|| anyhow::anyhow!("missing Chain ID"))?,
            nonce: nonce.ok_or_else(|| anyhow::anyhow!("missing Nonce"))?,
            issued_at: issued_at.ok_or_else(|| anyhow::anyhow!("missing Issued At"))?,
            expiration_time: expiration_time
                .ok_or_else(|| anyhow::anyhow!("missing Expiration Time"))?,
            resources,
        })
    }
}
