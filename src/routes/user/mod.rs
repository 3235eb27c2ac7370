mod handler;
mod model;

pub use handler::{login, logout, me, refresh_token, signup, verify_email, verify_email_link};
pub use model::{
    LoginRequest, LoginResponse, SignupRequest, SignupResponse, TokenResponse,
    VerifyEmailRequest,
};
