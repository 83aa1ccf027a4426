pub mod callback;
pub mod consent;
pub mod discovery;
pub mod pkce;
pub mod provider;
pub mod record;
pub mod store;
pub mod token;

pub use consent::{BrowserOpener, ConsentFlow, FlowSession, FlowStatus, PrintUrl, SystemBrowser};
pub use discovery::{discover_oauth_metadata, resolve_endpoints, OAuthMetadata};
pub use provider::{
    AuthenticatedClient, CredentialProvider, CredentialState, CredentialStatus, RevocationOutcome,
};
pub use record::CredentialRecord;
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use token::{TokenClient, TokenResponse};
