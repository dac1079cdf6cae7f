//! Auth context: who is calling and in which role. Tokens are issued by the
//! external auth service; this side only verifies them.

use uuid::Uuid;

use crate::{domain::Role, error::AppError};

mod claims;
pub mod extractors;
pub mod jwt;

pub use extractors::AuthActor;
pub use jwt::JwtKeys;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn require(&self, role: Role) -> Result<(), AppError> {
        if self.role == role {
            Ok(())
        } else {
            Err(AppError::unauthorized(format!("requires the {role} role")))
        }
    }
}
