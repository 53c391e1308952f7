//! Discovering playable files on disk.
//!
//! The scanner walks a directory and turns every audio file it finds into a
//! [`ResourceRef`](crate::engine::ResourceRef), in a stable order.

mod scan;

pub use scan::scan;

#[cfg(test)]
mod tests;
