//! The account pool and its collaborators: credential store, selector,
//! token refresher, project resolver and quota tracker.

mod project;
mod quota;
mod refresh;
mod selector;
mod store;

pub use project::ProjectResolver;
pub use quota::{AccountAuth, QuotaTracker, QuotaView};
pub use refresh::TokenRefresher;
pub use selector::pick_account;
pub use store::AccountPool;
