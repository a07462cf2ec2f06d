pub mod accounts;
pub mod catalog;
pub mod interactions;
pub mod listing;
pub mod mail;
pub mod recommendations;

pub use accounts::{AccountService, AccountSettings};
pub use catalog::CatalogService;
pub use interactions::InteractionService;
pub use listing::{PageParams, PageRequest, PageResult, Paginator};
pub use mail::{Email, LogMailer, Mailer, RelayMailer};
pub use recommendations::{RecommendationService, Recommendations};
