mod firebase;
mod mock;
mod provider;

pub use firebase::FirebaseIdentity;
pub use mock::MockIdentity;
pub use provider::{IdentityClaims, IdentityError, IdentityProfile, IdentityProvider};
