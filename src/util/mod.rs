pub mod vec2;

use std::future::Future;
use std::pin::Pin;

pub use vec2::Vec2;

/// Boxed future for object-safe async trait methods
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
