//! Resolution of authentication challenges for one logical request.
//!
//! Credential sources are consulted in a fixed order, each at most once:
//! preset credentials on the descriptor, then every enabled store, then the
//! delegate. Credentials the server already rejected are never offered
//! again, so the retry loop always terminates.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use tracing::{debug, info, warn};
use url::Url;

use super::challenge::parse_challenge;
use super::{AuthChallenge, AuthorizationHeader, Credential, CredentialKey, CredentialStore};
use crate::error::{AuthFailure, RequestError};

/// Outcome of inspecting a response's status and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Not a challenge; stream the body.
    Pass,
    /// Credentials are required (or were rejected).
    Challenge(AuthChallenge),
}

/// What the engine should do about a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Credentials were applied silently; reopen the stream.
    Retry,
    /// No automatic source is left; ask the delegate and wait on the gate.
    AskDelegate(AuthChallenge),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CredentialSource {
    Preset,
    Store(usize),
    Delegate,
}

#[derive(Debug, Clone)]
struct Attempt {
    credential: Credential,
    source: CredentialSource,
    key: Option<CredentialKey>,
}

/// Tracks credential attempts and builds the authorization header for the
/// next wire request.
#[derive(Debug)]
pub struct AuthChallengeHandler {
    url: Url,
    preset: Option<Credential>,
    stores: Vec<Arc<dyn CredentialStore>>,
    preset_tried: bool,
    next_store: usize,
    delegate_consulted: bool,
    attempted: Option<Attempt>,
    rejected: Vec<Credential>,
    authorization: Option<AuthorizationHeader>,
    realm: Option<String>,
}

impl AuthChallengeHandler {
    /// Creates a handler for requests to `url`.
    ///
    /// `stores` are the persistence scopes enabled for this request, in the
    /// order they are consulted.
    #[must_use]
    pub fn new(
        url: Url,
        preset: Option<Credential>,
        stores: Vec<Arc<dyn CredentialStore>>,
    ) -> Self {
        Self {
            url,
            preset,
            stores,
            preset_tried: false,
            next_store: 0,
            delegate_consulted: false,
            attempted: None,
            rejected: Vec::new(),
            authorization: None,
            realm: None,
        }
    }

    /// Classifies a response as a challenge or a pass.
    #[must_use]
    pub fn evaluate(&self, status: u16, headers: &HeaderMap) -> Evaluation {
        match parse_challenge(status, headers) {
            Some(challenge) => Evaluation::Challenge(challenge),
            None => Evaluation::Pass,
        }
    }

    /// Authorization header to put on the next wire request.
    #[must_use]
    pub fn authorization(&self) -> Option<&AuthorizationHeader> {
        self.authorization.as_ref()
    }

    /// Realm of the most recent challenge.
    #[must_use]
    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    /// Credentials currently being offered.
    #[must_use]
    pub fn attempted_credential(&self) -> Option<&Credential> {
        self.attempted.as_ref().map(|attempt| &attempt.credential)
    }

    /// Decides how to answer `challenge`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Authentication`] when the scheme cannot be
    /// answered or the server rejected delegate-supplied credentials.
    pub fn on_challenge(&mut self, challenge: &AuthChallenge) -> Result<Resolution, RequestError> {
        let realm = challenge.realm().to_string();
        self.realm = Some(realm.clone());

        if !challenge.is_supported() {
            warn!(scheme = %challenge.scheme(), realm = %realm, "unsupported authentication scheme");
            return Err(RequestError::authentication(
                realm,
                AuthFailure::UnsupportedScheme,
            ));
        }

        if let Some(attempt) = self.attempted.take() {
            self.authorization = None;
            info!(realm = %realm, username = %attempt.credential.username(), "credentials rejected");
            self.forget_rejected(&attempt);
            self.rejected.push(attempt.credential);
            if attempt.source == CredentialSource::Delegate {
                return Err(RequestError::authentication(realm, AuthFailure::Rejected));
            }
        }

        if !self.preset_tried {
            self.preset_tried = true;
            if let Some(preset) = self.preset.clone()
                && !self.rejected.contains(&preset)
            {
                debug!(realm = %realm, "applying preset credentials");
                self.apply(challenge, preset, CredentialSource::Preset);
                return Ok(Resolution::Retry);
            }
        }

        if let Some(key) = CredentialKey::for_url(&self.url, realm.clone()) {
            while self.next_store < self.stores.len() {
                let index = self.next_store;
                self.next_store += 1;
                let store = &self.stores[index];
                match store.lookup(&key) {
                    Ok(Some(credential)) if !self.rejected.contains(&credential) => {
                        debug!(realm = %realm, scope = ?store.scope(), "applying stored credentials");
                        self.apply(challenge, credential, CredentialSource::Store(index));
                        return Ok(Resolution::Retry);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(scope = ?store.scope(), error = %e, "credential lookup failed"),
                }
            }
        }

        if !self.delegate_consulted {
            self.delegate_consulted = true;
            return Ok(Resolution::AskDelegate(challenge.clone()));
        }

        Err(self.exhausted())
    }

    /// Applies credentials supplied by the delegate for `challenge`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Authentication`] if the server already rejected
    /// these exact credentials.
    pub fn apply_delegate_credentials(
        &mut self,
        challenge: &AuthChallenge,
        credential: Credential,
    ) -> Result<(), RequestError> {
        if self.rejected.contains(&credential) {
            return Err(RequestError::authentication(
                challenge.realm(),
                AuthFailure::Rejected,
            ));
        }
        self.apply(challenge, credential, CredentialSource::Delegate);
        Ok(())
    }

    /// The terminal error for a challenge nobody could answer.
    #[must_use]
    pub fn exhausted(&self) -> RequestError {
        let reason = if self.rejected.is_empty() {
            AuthFailure::NoCredentials
        } else {
            AuthFailure::Rejected
        };
        RequestError::authentication(self.realm.clone().unwrap_or_default(), reason)
    }

    /// Records that the current credentials were accepted and saves them to
    /// every enabled store. Returns the accepted credentials.
    pub fn on_success(&mut self) -> Option<Credential> {
        let attempt = self.attempted.as_ref()?;
        if let Some(key) = attempt.key.as_ref() {
            for store in &self.stores {
                match store.save(key, &attempt.credential) {
                    Ok(()) => debug!(scope = ?store.scope(), key = %key, "saved credentials"),
                    Err(e) => warn!(scope = ?store.scope(), error = %e, "failed to save credentials"),
                }
            }
        }
        Some(attempt.credential.clone())
    }

    fn apply(&mut self, challenge: &AuthChallenge, credential: Credential, source: CredentialSource) {
        self.authorization = AuthorizationHeader::basic(challenge.kind(), &credential);
        if self.authorization.is_none() {
            warn!(realm = %challenge.realm(), "credentials cannot be encoded as a header value");
        }
        self.attempted = Some(Attempt {
            credential,
            source,
            key: CredentialKey::for_url(&self.url, challenge.realm()),
        });
    }

    fn forget_rejected(&self, attempt: &Attempt) {
        let (CredentialSource::Store(index), Some(key)) = (attempt.source, attempt.key.as_ref())
        else {
            return;
        };
        if let Some(store) = self.stores.get(index)
            && let Err(e) = store.remove(key)
        {
            warn!(scope = ?store.scope(), error = %e, "failed to remove rejected credentials");
        }
    }
}
