//! Late-bound handler invocation
//!
//! A [`Callback`] is a type-erased trampoline generated at registration
//! time. It records the parameter list of the concrete closure it wraps and
//! exposes a uniform "call with an untyped argument list" entry point.
//! Arguments are adapted to the declared arity before the call (see
//! [`crate::adapter`]); a value of the wrong type at any position fails the
//! call with [`DispatchError::ArgumentType`].

use crate::adapter;
use crate::error::{DispatchError, Result};
use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

/// A dynamically-typed argument passed to `emit`
pub type Arg = Arc<dyn Any + Send + Sync>;

/// Wrap a value as an [`Arg`]
pub fn arg<T: Any + Send + Sync>(value: T) -> Arg {
    Arc::new(value)
}

/// Build a `Vec<Arg>` from a list of values
///
/// ```rust
/// let args = a3s_dispatch::args![42_i64, String::from("hello")];
/// assert_eq!(args.len(), 2);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Arg>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::arg($value)),+]
    };
}

/// Types usable as handler parameters
///
/// Missing trailing arguments are filled with `Default::default()`, and
/// supplied arguments are cloned out of their shared slot.
pub trait Param: Any + Clone + Default + Send + Sync {}

impl<T: Any + Clone + Default + Send + Sync> Param for T {}

/// Declared type of one handler parameter
#[derive(Clone, Copy)]
pub struct ParamSpec {
    type_id: TypeId,
    type_name: &'static str,
    zero: fn() -> Arg,
    holds: fn(&Arg) -> bool,
}

fn zero_of<T: Param>() -> Arg {
    Arc::new(T::default())
}

fn holds<T: Param>(arg: &Arg) -> bool {
    arg.is::<T>()
}

impl ParamSpec {
    /// Describe parameter type `T`
    pub fn of<T: Param>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            zero: zero_of::<T>,
            holds: holds::<T>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Zero value of the parameter type
    pub fn zero(&self) -> Arg {
        (self.zero)()
    }

    /// Whether `arg` holds a value of exactly this type
    pub fn accepts(&self, arg: &Arg) -> bool {
        (self.holds)(arg)
    }
}

impl PartialEq for ParamSpec {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ParamSpec {}

impl fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

type Invoke = dyn Fn(&[Arg]) -> Result<()> + Send + Sync;

/// What makes two erased callables "the same function value"
///
/// Zero-sized callables (`fn` items, closures without captures) and
/// capturing closures are told apart by their concrete type, which is
/// unique per item or closure literal. A `fn` pointer or boxed closure
/// shares its type with every other value of the same signature, so the
/// value's address joins the key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Identity {
    Type(TypeId),
    Address(TypeId, usize),
    Instance(Uuid),
}

impl Identity {
    fn of_type<F: 'static>() -> Self {
        Identity::Type(TypeId::of::<F>())
    }

    fn at<F: 'static>(address: usize) -> Self {
        Identity::Address(TypeId::of::<F>(), address)
    }

    /// Identity of a boxed closure
    ///
    /// Boxes of zero-sized closures all point at the same dangling address
    /// and a `Box` cannot be cloned, so each one gets a fresh key.
    fn boxed<F: 'static>(address: usize, size: usize) -> Self {
        if size == 0 {
            Identity::Instance(Uuid::new_v4())
        } else {
            Identity::at::<F>(address)
        }
    }
}

/// A type-erased, invokable handler
///
/// Identity is structural: two callbacks are the same callable when they
/// wrap the same function value with the same signature. Every closure
/// literal and every `fn` item has its own type, so clones of one closure
/// compare equal while two textually identical closures do not. `fn`
/// pointers compare by address, and a boxed closure only matches clones of
/// the `Callback` it was erased into.
#[derive(Clone)]
pub struct Callback {
    identity: Identity,
    name: &'static str,
    params: Arc<[ParamSpec]>,
    invoke: Arc<Invoke>,
}

impl Callback {
    /// Erase a closure or function into a callback
    pub fn new<F, P>(f: F) -> Self
    where
        F: HandlerFn<P>,
    {
        f.erase()
    }

    fn from_parts<F, I>(identity: Identity, params: Vec<ParamSpec>, invoke: I) -> Self
    where
        F: 'static,
        I: Fn(&[Arg]) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            identity,
            name: std::any::type_name::<F>(),
            params: params.into(),
            invoke: Arc::new(invoke),
        }
    }

    /// Declared parameter list
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Type name of the wrapped callable, for diagnostics
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether `other` wraps the same callable with the same signature
    pub fn same_callable(&self, other: &Callback) -> bool {
        self.identity == other.identity && self.params == other.params
    }

    /// Adapt `args` to the declared arity and invoke
    pub fn call(&self, args: &[Arg]) -> Result<()> {
        let adapted = adapter::adapt(&self.params, args);
        (self.invoke)(&adapted)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

/// Functions of up to eight [`Param`] arguments
///
/// `P` is the parameter tuple; it only exists so that one closure type can
/// be matched against the impl for its own arity.
pub trait HandlerFn<P>: Send + Sync + 'static {
    fn erase(self) -> Callback;
}

fn take<T: Param>(args: &[Arg], position: &mut usize) -> Result<T> {
    let index = *position;
    *position += 1;
    args.get(index)
        .and_then(|arg| arg.downcast_ref::<T>())
        .cloned()
        .ok_or(DispatchError::ArgumentType {
            position: index,
            expected: std::any::type_name::<T>(),
        })
}

macro_rules! impl_handler_fn {
    ($($param:ident),*) => {
        impl<F, $($param,)*> HandlerFn<($($param,)*)> for F
        where
            F: Fn($($param),*) + Send + Sync + 'static,
            $($param: Param,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn erase(self) -> Callback {
                let value: &dyn Any = &self;
                let identity = if std::mem::size_of::<F>() == 0 {
                    Identity::of_type::<F>()
                } else if let Some(pointer) = value.downcast_ref::<fn($($param),*)>() {
                    Identity::at::<F>(*pointer as usize)
                } else if let Some(boxed) =
                    value.downcast_ref::<Box<dyn Fn($($param),*) + Send + Sync>>()
                {
                    let inner: &(dyn Fn($($param),*) + Send + Sync) = &**boxed;
                    Identity::boxed::<F>(
                        inner as *const (dyn Fn($($param),*) + Send + Sync) as *const () as usize,
                        std::mem::size_of_val(inner),
                    )
                } else {
                    Identity::of_type::<F>()
                };

                Callback::from_parts::<F, _>(
                    identity,
                    vec![$(ParamSpec::of::<$param>()),*],
                    move |args: &[Arg]| {
                        let mut position = 0;
                        $(let $param = take::<$param>(args, &mut position)?;)*
                        (self)($($param),*);
                        Ok(())
                    },
                )
            }
        }
    };
}

impl_handler_fn!();
impl_handler_fn!(A1);
impl_handler_fn!(A1, A2);
impl_handler_fn!(A1, A2, A3);
impl_handler_fn!(A1, A2, A3, A4);
impl_handler_fn!(A1, A2, A3, A4, A5);
impl_handler_fn!(A1, A2, A3, A4, A5, A6);
impl_handler_fn!(A1, A2, A3, A4, A5, A6, A7);
impl_handler_fn!(A1, A2, A3, A4, A5, A6, A7, A8);

/// Marker for [`IntoCallback`] on plain functions and closures
pub struct FnMarker<P>(PhantomData<P>);

/// Marker for [`IntoCallback`] on already-erased or dynamic values
pub struct ValueMarker;

/// Values accepted by the registration calls
///
/// Closures and functions always convert. Dynamic values are checked at
/// run time: an [`Arg`] that does not hold a `Callback` is rejected with
/// [`DispatchError::NotAFunction`], and an absent callback with
/// [`DispatchError::FunctionIsNil`].
pub trait IntoCallback<M> {
    fn into_callback(self) -> Result<Callback>;
}

impl<F, P> IntoCallback<FnMarker<P>> for F
where
    F: HandlerFn<P>,
{
    fn into_callback(self) -> Result<Callback> {
        Ok(self.erase())
    }
}

impl IntoCallback<ValueMarker> for Callback {
    fn into_callback(self) -> Result<Callback> {
        Ok(self)
    }
}

impl IntoCallback<ValueMarker> for Option<Callback> {
    fn into_callback(self) -> Result<Callback> {
        self.ok_or(DispatchError::FunctionIsNil)
    }
}

impl IntoCallback<ValueMarker> for Arg {
    fn into_callback(self) -> Result<Callback> {
        if let Some(callback) = self.downcast_ref::<Callback>() {
            return Ok(callback.clone());
        }
        match self.downcast_ref::<Option<Callback>>() {
            Some(Some(callback)) => Ok(callback.clone()),
            Some(None) => Err(DispatchError::FunctionIsNil),
            None => Err(DispatchError::NotAFunction),
        }
    }
}
