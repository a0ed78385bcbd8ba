//! Capability detection for concrete table types.
//!
//! For every optional capability there is a pair of traits with the same
//! method name: `DetectX` is implemented for `Detect<T>` when `T` has the
//! capability and fills the slot, `SkipX` is implemented for `&Detect<T>`
//! and leaves the dispatch table alone. Calling the method on a `&Detect<T>`
//! picks `DetectX` if it applies, because it needs no extra auto-reference,
//! and falls back to `SkipX` otherwise. Resolution happens at compile time,
//! so this only works where `T` is a concrete type, which is what
//! [`dispatch_table!`](crate::dispatch_table) arranges.
use std::marker::PhantomData;

use super::{
    Creatable, Dispatch, IndexPlanner, Mutable, Overloadable, RecursiveTransactional, Renamable,
    ShadowNames, Transactional, VirtualTable,
};

pub struct Detect<T>(PhantomData<fn() -> T>);

impl<T> Detect<T> {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Detect<T> {
        Detect(PhantomData)
    }
}

macro_rules! capability_check {
    ($detect:ident, $skip:ident, $method:ident, $bound:ident, $with:ident) => {
        pub trait $detect {
            type Table: VirtualTable;
            fn $method(&self, dispatch: Dispatch<Self::Table>) -> Dispatch<Self::Table>;
        }
        impl<T: $bound> $detect for Detect<T> {
            type Table = T;
            fn $method(&self, dispatch: Dispatch<T>) -> Dispatch<T> {
                dispatch.$with()
            }
        }
        pub trait $skip {
            type Table;
            fn $method(&self, dispatch: Dispatch<Self::Table>) -> Dispatch<Self::Table> {
                dispatch
            }
        }
        impl<T: VirtualTable> $skip for &Detect<T> {
            type Table = T;
        }
    };
}

capability_check!(DetectCreate, SkipCreate, detect_create, Creatable, with_create);
capability_check!(DetectUpdate, SkipUpdate, detect_update, Mutable, with_update);
capability_check!(DetectTransactions, SkipTransactions, detect_transactions, Transactional, with_transactions);
capability_check!(DetectSavepoints, SkipSavepoints, detect_savepoints, RecursiveTransactional, with_savepoints);
capability_check!(DetectFindFunction, SkipFindFunction, detect_find_function, Overloadable, with_find_function);
capability_check!(DetectRename, SkipRename, detect_rename, Renamable, with_rename);
capability_check!(DetectShadowName, SkipShadowName, detect_shadow_name, ShadowNames, with_shadow_name);
capability_check!(DetectIndexPlanner, SkipIndexPlanner, detect_index_planner, IndexPlanner, with_index_planner);

/// Build the [`Dispatch`](crate::virtual_table::Dispatch) for a concrete
/// table type, filling every slot whose capability trait it implements.
///
/// ```ignore
/// let dispatch = dispatch_table!(OrderedMap);
/// assert!(dispatch.capabilities().contains(Capabilities::MUTABLE));
/// ```
#[macro_export]
macro_rules! dispatch_table {
    ($table:ty) => {{
        #[allow(unused_imports)]
        use $crate::virtual_table::introspect::{
            DetectCreate as _, DetectFindFunction as _, DetectIndexPlanner as _, DetectRename as _,
            DetectSavepoints as _, DetectShadowName as _, DetectTransactions as _, DetectUpdate as _,
            SkipCreate as _, SkipFindFunction as _, SkipIndexPlanner as _, SkipRename as _,
            SkipSavepoints as _, SkipShadowName as _, SkipTransactions as _, SkipUpdate as _,
        };
        let detector = $crate::virtual_table::introspect::Detect::<$table>::new();
        let dispatch = $crate::virtual_table::Dispatch::<$table>::new();
        let dispatch = (&detector).detect_create(dispatch);
        let dispatch = (&detector).detect_update(dispatch);
        let dispatch = (&detector).detect_transactions(dispatch);
        let dispatch = (&detector).detect_savepoints(dispatch);
        let dispatch = (&detector).detect_find_function(dispatch);
        let dispatch = (&detector).detect_rename(dispatch);
        let dispatch = (&detector).detect_shadow_name(dispatch);
        (&detector).detect_index_planner(dispatch)
    }};
}
