//! # Core Protocol Components
//!
//! Wire encoding and the packet codec.
//!
//! ## Components
//! - **Xdr**: checked length-prefixed field encoding
//! - **Packet**: the five packet kinds and their encrypted bodies
//!
//! ## Wire Format
//! ```text
//! [Type(4)] [Prologue(N)] [Header(8)] [Ciphertext(M)] [Footer(8)]
//! ```
//!
//! ## Security
//! - Type tag validated before any other field is read
//! - Declared lengths checked against remaining bytes before slicing
//! - Non-zero padding and trailing bytes rejected

pub mod packet;
pub mod xdr;
