// Authorization components for the dovecote delivery engine
//
// Implements the dovecote-core AuthComponent capability for the two shipped
// strategies:
// - OidcAuth: form-POST token exchange against an authority endpoint
// - TotpAuth: rotating six-digit codes, generated locally from a shared
//   secret or fetched from a code server
//
// A "custom" strategy is any other implementation of the trait.

pub mod oidc;
pub mod settings;
pub mod totp;

// Re-exports for convenience
pub use oidc::{OidcAuth, OidcAuthBuilder};
pub use settings::AuthSettings;
pub use totp::{TotpAuth, TotpAuthBuilder};
