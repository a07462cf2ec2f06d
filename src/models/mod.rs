pub mod book;
pub mod interaction;
pub mod response;
pub mod user;

pub use book::{
    Author, Book, BookFilter, Category, CategoryNode, CategoryTree, NewBook, RelatedQuery,
    ROOT_CATEGORY,
};
pub use interaction::{mean_rating, Interaction, InteractionLookup, InteractionQuery, RateRequest};
pub use response::Envelope;
pub use user::{
    AccountToken, ActivateQuery, AuthResponse, ChangePasswordRequest, ForgotPasswordRequest,
    LoginRequest, RegisterRequest, ResetPasswordRequest, Session, TokenPurpose, User, UserInfo,
    UserSummary,
};
