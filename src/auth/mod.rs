//! HTTP authentication: challenge detection, credential sources, and the
//! pause/resume gate used while a delegate supplies credentials.

mod challenge;
mod credential;
mod gate;
mod handler;
mod store;

pub use challenge::{AuthChallenge, ChallengeKind, parse_challenge};
pub use credential::{AuthorizationHeader, Credential, CredentialKey};
pub use gate::{AuthResponder, Gate, GateBusy, GateSignal};
pub use handler::{AuthChallengeHandler, Evaluation, Resolution};
pub use store::{
    CredentialScope, CredentialStore, KeyringCredentialStore, SessionCredentialStore, StoreError,
};
