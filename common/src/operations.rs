//! Abstract operations.

use std::marker::PhantomData;

/// Operation to insert a value.
#[derive(Clone, Copy, Debug)]
pub struct Insert<T>(pub T);

/// Operation to update a value.
#[derive(Clone, Copy, Debug)]
pub struct Update<T>(pub T);

/// Operation to select a value.
#[derive(Clone, Copy, Debug)]
pub struct Select<T>(pub T);

/// Operation to start a value.
#[derive(Clone, Copy, Debug)]
pub struct Start<T>(pub T);

/// Operation to perform a value.
#[derive(Clone, Copy, Debug)]
pub struct Perform<T>(pub T);

/// Operation to reserve a value provisionally.
#[derive(Clone, Copy, Debug)]
pub struct Reserve<T>(pub T);

/// Operation to commit a previously [`Reserve`]d value.
#[derive(Clone, Copy, Debug)]
pub struct Commit<T>(pub T);

/// Operation to refund a previously [`Reserve`]d value.
#[derive(Clone, Copy, Debug)]
pub struct Refund<T>(pub T);

/// Operation to debit a value directly.
#[derive(Clone, Copy, Debug)]
pub struct Debit<T>(pub T);

/// Operation to rent a value.
#[derive(Clone, Copy, Debug)]
pub struct Rent<T>(pub T);

/// Operation to cancel a value.
#[derive(Clone, Copy, Debug)]
pub struct Cancel<T>(pub T);

/// Selector of `W` by `B`.
#[derive(Clone, Copy, Debug)]
pub struct By<W, B> {
    /// Type of the value to select.
    _what: PhantomData<W>,

    /// Value to select by.
    by: B,
}

impl<W, B> By<W, B> {
    /// Creates a new [`By`] with the given value.
    #[must_use]
    pub fn new(by: B) -> Self {
        Self {
            _what: PhantomData,
            by,
        }
    }

    /// Consumes this [`By`] and returns the inner value.
    #[must_use]
    pub fn into_inner(self) -> B {
        self.by
    }
}
