use core::ops::{Deref, DerefMut};

/// Owner of resources that are handed back to pools tagged with a fence value.
pub trait Retire {
    /// Gives up every resource touched since the previous call.
    /// They become reusable once the fence reaches `value`.
    fn retire(&mut self, value: u64);
}

impl<R> Retire for &mut R
where
    R: Retire + ?Sized,
{
    fn retire(&mut self, value: u64) {
        (**self).retire(value)
    }
}

/// Guard that retires borrowed resources when it goes out of scope.
///
/// Retires with the value recorded by [`submitted`](#method.submitted),
/// or with the fallback value if the scope was left before submission.
/// The fallback should be a value that is signaled no earlier than any work
/// recorded with these resources, such as the last signaled fence value.
pub struct RetireScope<'a, R>
where
    R: Retire + ?Sized,
{
    target: &'a mut R,
    value: u64,
}

impl<'a, R> RetireScope<'a, R>
where
    R: Retire + ?Sized,
{
    pub fn new(target: &'a mut R, fallback: u64) -> Self {
        RetireScope {
            target,
            value: fallback,
        }
    }

    /// Records fence value of the submission that used the resources.
    pub fn submitted(&mut self, value: u64) {
        self.value = value;
    }
}

impl<R> Deref for RetireScope<'_, R>
where
    R: Retire + ?Sized,
{
    type Target = R;

    fn deref(&self) -> &R {
        self.target
    }
}

impl<R> DerefMut for RetireScope<'_, R>
where
    R: Retire + ?Sized,
{
    fn deref_mut(&mut self) -> &mut R {
        self.target
    }
}

impl<R> Drop for RetireScope<'_, R>
where
    R: Retire + ?Sized,
{
    fn drop(&mut self) {
        self.target.retire(self.value);
    }
}
