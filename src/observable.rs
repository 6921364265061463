//! Change-notifying values.
//!
//! Every mutable display setting is an [`Observable`]. Listeners registered
//! with [`Observable::subscribe`] run synchronously, in registration order,
//! whenever [`Observable::set`] stores a value that differs from the current
//! one. Everything here is single-threaded: values live in `Rc`/`RefCell`
//! and callbacks run on the rendering thread.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// Handle returned by [`Observable::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<T> = Rc<dyn Fn(&T)>;

struct Inner<T> {
    value: RefCell<T>,
    listeners: RefCell<Vec<(ListenerId, Listener<T>)>>,
    next_id: Cell<u64>,
}

/// A shared, observable value. Cloning an `Observable` yields another handle
/// to the same value and listener list.
pub struct Observable<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("value", &self.inner.value.borrow())
            .field("listeners", &self.inner.listeners.borrow().len())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(Inner {
                value: RefCell::new(value),
                listeners: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
            }),
        }
    }

    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Store a new value and notify listeners. Returns `false` (and notifies
    /// nobody) when the value is unchanged.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                return false;
            }
            *current = value;
        }
        self.notify();
        true
    }

    /// Call every listener with the current value. Listeners may freely
    /// read or set this observable, or subscribe new listeners; those only
    /// take part in the next notification.
    pub fn notify(&self) {
        let value = self.get();
        let listeners: Vec<Listener<T>> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();
        for listener in listeners {
            listener(&value);
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> ListenerId {
        let id = ListenerId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);
        self.inner
            .listeners
            .borrow_mut()
            .push((id, Rc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    pub fn downgrade(&self) -> WeakObservable<T> {
        WeakObservable {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + Default + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Non-owning handle to an [`Observable`].
pub struct WeakObservable<T> {
    inner: Weak<Inner<T>>,
}

impl<T> WeakObservable<T> {
    pub fn upgrade(&self) -> Option<Observable<T>> {
        self.inner.upgrade().map(|inner| Observable { inner })
    }
}

/// A bundle of listener registrations that are all removed together, either
/// explicitly through [`Subscriptions::clear`] or when the bundle is dropped.
#[derive(Default)]
pub struct Subscriptions {
    handles: Vec<Box<dyn FnOnce()>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch<T: Clone + PartialEq + 'static>(
        &mut self,
        observable: &Observable<T>,
        listener: impl Fn(&T) + 'static,
    ) {
        let id = observable.subscribe(listener);
        let weak = observable.downgrade();
        self.handles.push(Box::new(move || {
            if let Some(obs) = weak.upgrade() {
                obs.unsubscribe(id);
            }
        }));
    }

    /// Watch an observable, raising `flag` whenever it changes.
    pub fn raise_on<T: Clone + PartialEq + 'static>(
        &mut self,
        observable: &Observable<T>,
        flag: &DirtyFlag,
    ) {
        let flag = flag.clone();
        self.watch(observable, move |_| flag.raise());
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn clear(&mut self) {
        for unsubscribe in self.handles.drain(..) {
            unsubscribe();
        }
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        self.clear();
    }
}

/// A shared boolean "needs regenerating" marker. Listeners raise it, the
/// owner takes it at the start of the next frame.
#[derive(Debug, Clone, Default)]
pub struct DirtyFlag(Rc<Cell<bool>>);

impl DirtyFlag {
    pub fn new(dirty: bool) -> Self {
        Self(Rc::new(Cell::new(dirty)))
    }

    pub fn raise(&self) {
        self.0.set(true);
    }

    pub fn is_raised(&self) -> bool {
        self.0.get()
    }

    /// Return the flag state and lower it.
    pub fn take(&self) -> bool {
        self.0.replace(false)
    }
}
