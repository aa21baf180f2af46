//! # OAuth Study API
//!
//! A protected resource server. Every `/api` route extracts the bearer
//! token, asks the [`Authorizer`](oauth_study_auth::Authorizer) for a
//! [`Decision`](oauth_study_auth::Decision) under the route's policy, and
//! maps rejections to 401/403 with an RFC 6750 challenge.
//!
//! | route               | policy                            |
//! |---------------------|-----------------------------------|
//! | `GET /healthz`      | none                              |
//! | `GET /api/hello`    | `REQUIRED_ROLE` + `READ_SCOPE`    |
//! | `POST /api/messages`| `WRITER_ROLE` + `WRITE_SCOPE`     |

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
