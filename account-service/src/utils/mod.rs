pub mod password;
pub mod token;
pub mod validation;

pub use password::{
    hash_password, verify_against_dummy, verify_password, Password, PasswordHashString,
};
pub use token::{generate_reset_token, hash_token};
pub use validation::{field_error, ValidatedJson};
