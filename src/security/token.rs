use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use thiserror::Error;

use crate::security::bootstrap::SecretBundle;

pub const ADMIN_ROLE: &str = "Admin";

/// Why a bearer token was rejected. Only logged; clients get a bare 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("no bearer token presented")]
    MissingToken,
    #[error("token is malformed")]
    MalformedToken,
    #[error("token signature is invalid")]
    BadSignature,
    #[error("token issuer does not match")]
    IssuerMismatch,
    #[error("token audience does not match")]
    AudienceMismatch,
    #[error("token has expired")]
    Expired,
    #[error("token is not valid yet")]
    NotYetValid,
    #[error("token carries no subject")]
    MissingSubject,
}

/// Authenticated caller: subject id plus role names, nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    subject_id: String,
    roles: BTreeSet<String>,
}

impl Principal {
    pub(crate) fn new<I, R>(subject_id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            subject_id: subject_id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn contains(&self, value: &str) -> bool {
        match self {
            OneOrMany::One(v) => v == value,
            OneOrMany::Many(vs) => vs.iter().any(|v| v == value),
        }
    }

    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(v) => vec![v],
            OneOrMany::Many(vs) => vs,
        }
    }
}

/// Claims as issued by the auth service; .NET-style URIs are accepted for
/// subject and role.
#[derive(Debug, Clone, Deserialize)]
struct TokenClaims {
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    aud: Option<OneOrMany>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    nbf: Option<i64>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    nameid: Option<String>,
    #[serde(
        default,
        rename = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier"
    )]
    name_identifier: Option<String>,
    #[serde(default)]
    role: Option<OneOrMany>,
    #[serde(default)]
    roles: Option<OneOrMany>,
    #[serde(
        default,
        rename = "http://schemas.microsoft.com/ws/2008/06/identity/claims/role"
    )]
    ms_role: Option<OneOrMany>,
}

impl TokenClaims {
    fn subject(&self) -> Option<&str> {
        [&self.sub, &self.nameid, &self.name_identifier]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|s| !s.trim().is_empty())
    }

    fn into_roles(self) -> BTreeSet<String> {
        [self.role, self.roles, self.ms_role]
            .into_iter()
            .flatten()
            .flat_map(OneOrMany::into_vec)
            .filter(|r| !r.is_empty())
            .collect()
    }
}

/// HMAC bearer-token validator. Built once from the bootstrap bundle and
/// shared read-only across requests.
pub struct TokenValidator {
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    leeway: i64,
}

impl TokenValidator {
    pub fn new(bundle: SecretBundle, leeway_secs: u64) -> Self {
        // Signature only; claims are checked below in a fixed order.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        Self {
            decoding_key: DecodingKey::from_secret(bundle.signing_key()),
            validation,
            issuer: bundle.issuer().to_string(),
            audience: bundle.audience().to_string(),
            leeway: i64::try_from(leeway_secs).unwrap_or(i64::MAX),
        }
    }

    pub fn validate(&self, token: &str) -> Result<Principal, AuthFailure> {
        self.validate_at(token, Utc::now().timestamp())
    }

    pub(crate) fn validate_at(&self, token: &str, now: i64) -> Result<Principal, AuthFailure> {
        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName
                | ErrorKind::InvalidKeyFormat => AuthFailure::BadSignature,
                _ => AuthFailure::MalformedToken,
            })?;
        let claims = data.claims;

        if claims.iss.as_deref() != Some(self.issuer.as_str()) {
            return Err(AuthFailure::IssuerMismatch);
        }
        if !claims
            .aud
            .as_ref()
            .is_some_and(|aud| aud.contains(&self.audience))
        {
            return Err(AuthFailure::AudienceMismatch);
        }
        match claims.exp {
            Some(exp) if exp.saturating_add(self.leeway) > now => {}
            _ => return Err(AuthFailure::Expired),
        }
        if let Some(nbf) = claims.nbf {
            if nbf.saturating_sub(self.leeway) > now {
                return Err(AuthFailure::NotYetValid);
            }
        }

        let subject = claims
            .subject()
            .map(str::to_string)
            .ok_or(AuthFailure::MissingSubject)?;

        Ok(Principal::new(subject, claims.into_roles()))
    }
}

impl fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenValidator")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

/// Token part of an `Authorization: Bearer <token>` header value.
pub fn extract_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
