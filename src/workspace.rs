use std::any::Any;
use std::cell::RefCell;
use std::thread::LocalKey;

/// Scratch buffers of arbitrary types, keyed by type.
///
/// Element assemblers are generic over scalar type and dimension, and `thread_local!` statics
/// cannot be generic. A single type-erased store per thread lets every instantiation keep its
/// own buffers, e.g. one `Vec<OPoint<f64, U2>>` for cell geometry.
#[derive(Debug, Default)]
pub struct Workspace {
    // Most recently used buffer is kept last
    buffers: Vec<Box<dyn Any>>,
}

impl Workspace {
    /// The buffer of type `W`, created with `W::default()` on first access.
    pub fn get_or_default<W>(&mut self) -> &mut W
    where
        W: 'static + Default,
    {
        match self.buffers.iter().rposition(|buffer| buffer.is::<W>()) {
            Some(idx) => {
                let buffer = self.buffers.remove(idx);
                self.buffers.push(buffer);
            }
            None => self.buffers.push(Box::<W>::default()),
        }

        self.buffers
            .last_mut()
            .and_then(|buffer| buffer.downcast_mut())
            .expect("Last buffer has type W")
    }
}

/// Run `f` with the buffer of type `W` in the given thread-local workspace.
///
/// # Panics
///
/// Panics if called re-entrantly with the same thread-local workspace.
pub fn with_thread_local_workspace<W, R, F>(workspace: &'static LocalKey<RefCell<Workspace>>, f: F) -> R
where
    W: 'static + Default,
    F: FnOnce(&mut W) -> R,
{
    workspace.with(|ws| f(ws.borrow_mut().get_or_default()))
}
