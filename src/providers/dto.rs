//! Wire DTOs for the upstream OAuth endpoints

use crate::braids::{AccessToken, ClientId, ClientIdRef, ClientSecretRef, RefreshToken, RefreshTokenRef};
use aliri_clock::DurationSecs;
use serde::{Deserialize, Serialize, Serializer};

/// The client-credentials grant payload
#[derive(Debug)]
pub struct ClientCredentialsGrant<'a> {
    /// The client ID making the request
    pub client_id: &'a ClientIdRef,
    /// The matching client secret
    pub client_secret: &'a ClientSecretRef,
}

impl Serialize for ClientCredentialsGrant<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("ClientCredentialsGrant", 3)?;
        ser.serialize_field("grant_type", "client_credentials")?;
        ser.serialize_field("client_id", self.client_id)?;
        ser.serialize_field("client_secret", self.client_secret)?;
        ser.end()
    }
}

/// The refresh-token grant payload
#[derive(Debug)]
pub struct RefreshGrant<'a> {
    /// The client ID making the request
    pub client_id: &'a ClientIdRef,
    /// The client secret, when the upstream requires one on refresh
    pub client_secret: Option<&'a ClientSecretRef>,
    /// The long-lived refresh token being exchanged
    pub refresh_token: &'a RefreshTokenRef,
}

impl Serialize for RefreshGrant<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("RefreshGrant", 4)?;
        ser.serialize_field("grant_type", "refresh_token")?;
        ser.serialize_field("client_id", self.client_id)?;
        if let Some(secret) = self.client_secret {
            ser.serialize_field("client_secret", secret)?;
        } else {
            ser.skip_field("client_secret")?;
        }
        ser.serialize_field("refresh_token", self.refresh_token)?;
        ser.end()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: AccessToken,
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    #[serde(default)]
    pub expires_in: Option<DurationSecs>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ValidationResponse {
    pub expires_in: DurationSecs,
    #[serde(default)]
    pub client_id: Option<ClientId>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
}
