//! Credential issuance seam.
//!
//! Password hashing and session minting live outside this crate. The
//! invitation manager needs an opaque hash to store on the accepting user's
//! row, and an opaque session credential to hand back so the new member
//! lands signed in.

use crate::error::Result;
use async_trait::async_trait;

/// Turns raw secrets into stored and issued credentials.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Hash a raw password for storage.
    async fn hash_password(&self, raw: &str) -> Result<String>;

    /// Mint a session credential for a user.
    async fn issue_session(&self, user_id: &str) -> Result<String>;
}

/// Marks credentials with a fixed prefix instead of hashing. Test use only;
/// never wire into a deployment.
#[derive(Debug, Default, Clone)]
pub struct PlainCredentialIssuer;

#[async_trait]
impl CredentialIssuer for PlainCredentialIssuer {
    async fn hash_password(&self, raw: &str) -> Result<String> {
        Ok(format!("plain${raw}"))
    }

    async fn issue_session(&self, user_id: &str) -> Result<String> {
        Ok(format!("session${user_id}"))
    }
}
