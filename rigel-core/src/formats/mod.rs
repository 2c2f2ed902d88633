//! Components E and F: the two firmware file codecs `rigel_core::image`
//! drives through a common `sniff_bounds`/`load`/`write` shape (spec.md
//! §9, "Polymorphism over file formats").

pub mod hex32;
pub mod ifibin;
