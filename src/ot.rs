//! Oblivious transfer between the two compute parties.
//!
//! [`base`] bootstraps 128 OTs with public-key operations once per connection, [`extension`]
//! turns them into any number of cheap OTs over 64-bit words or single (packed) bits.

pub(crate) mod base;
pub(crate) mod extension;
mod transpose;

pub(crate) use extension::{OtSession, pack};

use crate::{
    error::Error,
    tag::{Tag, Task},
};

/// Allocates the two tags used by one batch of extended OTs.
pub(crate) fn tags(task: &mut Task) -> Result<(Tag, Tag), Error> {
    Ok((task.next_tag()?, task.next_tag()?))
}
