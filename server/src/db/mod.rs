pub mod memory;
pub mod models;
pub mod mongo;
pub mod repository;

pub use models::*;
pub use mongo::MongoDbContext;
pub use repository::{
    AuditStore, Database, OAuthAccountStore, OneTimeTokenStore, ReferralStore, SessionStore,
    UserStore,
};
