use core::fmt;
use log::debug;

use crate::{
    registry::Registry,
    remote::{self, Returned, Target},
    value::{self, Address, Value},
};

/// Upper bound on the bytes read back for one rendered string.
pub const MAX_STRING_LEN: usize = 2048;

#[derive(Debug, PartialEq, Eq)]
/// Why a value could not be rendered.
///
/// Failures are never propagated to the host: `Display` turns each one into
/// the bracketed diagnostic shown in place of the value.
pub enum Failure {
    /// The value has no memory address to hand to the renderer.
    Unresolvable {
        /// Last candidate address that was rejected.
        attempted: u64,
    },
    /// The evaluation engine could not run the renderer.
    Evaluation(String),
    /// The rendered string could not be read from target memory.
    MemoryRead(String),
    /// The renderer produced neither a summary nor a string pointer.
    Empty,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Unresolvable { attempted } => write!(
                f,
                "<error: variable({attempted:#x}) is in register (not memory), cannot pass address>"
            ),
            Failure::Evaluation(e) => write!(f, "<error: expression failed: {e}>"),
            Failure::MemoryRead(e) => {
                write!(f, "<error: reading string memory: {e}>")
            }
            Failure::Empty => write!(f, "<error: renderer returned an empty result>"),
        }
    }
}

/// Turn the result of a renderer call into text.
///
/// The engine's summary wins; otherwise the C string at the returned pointer
/// is read, up to `MAX_STRING_LEN` bytes.
///
/// # Errors
///
/// Returns `Failure::MemoryRead` if the string cannot be read and
/// `Failure::Empty` if there is nothing to read.
pub fn extract<T: Target + ?Sized>(
    target: &mut T,
    returned: &Returned,
) -> Result<String, Failure> {
    if let Some(summary) = &returned.summary {
        return Ok(summary.clone());
    }

    if returned.pointer == 0 {
        return Err(Failure::Empty);
    }

    let bytes = target
        .read_c_string(returned.pointer, MAX_STRING_LEN)
        .map_err(|e| Failure::MemoryRead(e.message().to_string()))?;
    debug!("read {} bytes at {:#x}", bytes.len(), returned.pointer);

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// The dispatcher: renders registered values through the target's own
/// renderer functions.
pub struct Renderer<'a> {
    registry: &'a Registry,
}

impl<'a> Renderer<'a> {
    #[must_use]
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Render `value` through `renderer` and release the remote buffer.
    ///
    /// # Errors
    ///
    /// Returns the `Failure` of whichever step gave up first. A failing free
    /// call is not a failure.
    pub fn render_with<V, T>(
        &self,
        renderer: &str,
        value: &V,
        target: &mut T,
    ) -> Result<String, Failure>
    where
        V: Value + ?Sized,
        T: Target + ?Sized,
    {
        let addr = match value::resolve(value) {
            Address::Resolved(addr) if value::is_valid(addr) => addr,
            Address::Resolved(addr) => {
                return Err(Failure::Unresolvable { attempted: addr })
            }
            Address::Unresolvable { attempted } => {
                return Err(Failure::Unresolvable { attempted })
            }
        };

        let returned = remote::invoke(target, renderer, addr)
            .map_err(|e| Failure::Evaluation(e.message().to_string()))?;
        let text = extract(target, &returned)?;

        if returned.pointer != 0 {
            remote::release(target, self.registry.free_function(), returned.pointer);
        }

        Ok(text)
    }

    /// Render `value` if its type is registered.
    ///
    /// Returns `None` for unregistered types so the host keeps its default
    /// formatting. Otherwise the result is the rendered text, or a bracketed
    /// diagnostic if any step failed.
    pub fn render<V, T>(&self, value: &V, target: &mut T) -> Option<String>
    where
        V: Value + ?Sized,
        T: Target + ?Sized,
    {
        let renderer = self.registry.renderer(value.type_name())?;
        debug!("rendering {} with {renderer}", value.type_name());
        Some(
            self.render_with(renderer, value, target)
                .unwrap_or_else(|failure| failure.to_string()),
        )
    }
}
