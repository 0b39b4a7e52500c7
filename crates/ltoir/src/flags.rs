//! Boolean and small-enum attributes carried by tree nodes.
//!
//! A single struct holds every attribute any node kind can carry. Which of
//! them are meaningful for a given kind is decided by the streamer's per-kind
//! field descriptors; attributes a kind does not carry stay at their default.

/// Symbol visibility values for [`TreeFlags::visibility`].
pub mod visibility {
    pub const DEFAULT: u8 = 0;
    pub const PROTECTED: u8 = 1;
    pub const HIDDEN: u8 = 2;
    pub const INTERNAL: u8 = 3;
}

/// Thread-local storage models for [`TreeFlags::tls_model`].
pub mod tls_model {
    pub const NONE: u8 = 0;
    pub const EMULATED: u8 = 1;
    pub const REAL: u8 = 2;
    pub const GLOBAL_DYNAMIC: u8 = 3;
    pub const LOCAL_DYNAMIC: u8 = 4;
    pub const INITIAL_EXEC: u8 = 5;
    pub const LOCAL_EXEC: u8 = 6;
}

/// Builtin classes for [`TreeFlags::builtin_class`].
pub mod builtin_class {
    pub const NOT_BUILT_IN: u8 = 0;
    pub const FRONTEND: u8 = 1;
    pub const MD: u8 = 2;
    pub const NORMAL: u8 = 3;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TreeFlags {
    // Common to every node.
    pub side_effects: bool,
    pub constant: bool,
    pub addressable: bool,
    pub volatile: bool,
    pub readonly: bool,
    pub public: bool,
    pub is_static: bool,
    pub unsigned: bool,
    pub nothrow: bool,
    pub used: bool,
    pub private: bool,
    pub protected: bool,
    pub deprecated: bool,
    pub asm_written: bool,

    // Constants.
    pub overflow: bool,

    // Expressions.
    pub no_warning: bool,
    pub tail_call: bool,
    pub return_slot_opt: bool,

    // SSA names.
    pub occurs_in_abnormal_phi: bool,
    pub is_default_def: bool,
    pub in_free_list: bool,

    // Types.
    pub string_flag: bool,
    pub no_force_blk: bool,
    pub needs_constructing: bool,
    pub transparent_aggr: bool,
    pub restrict: bool,
    pub packed: bool,
    pub user_align: bool,
    pub nonaliased_component: bool,
    pub ref_can_alias_all: bool,

    // Declarations.
    pub external: bool,
    pub artificial: bool,
    pub ignored: bool,
    pub nonlocal: bool,
    pub is_virtual: bool,
    pub gimple_reg: bool,
    pub debug_expr_from: bool,
    pub has_value_expr: bool,

    // Declarations with linkage.
    pub weak: bool,
    pub comdat: bool,
    pub common: bool,
    pub in_text_section: bool,
    pub hard_register: bool,
    pub seen_in_bind_expr: bool,
    pub visibility_specified: bool,
    /// Two bits, see [`visibility`].
    pub visibility: u8,
    /// Three bits, see [`tls_model`].
    pub tls_model: u8,

    // Functions.
    pub inline: bool,
    pub declared_inline: bool,
    pub uninlinable: bool,
    pub is_malloc: bool,
    pub pure: bool,
    pub static_ctor: bool,
    pub static_dtor: bool,
    pub no_instrument: bool,
    pub no_limit_stack: bool,
    pub possibly_inlined: bool,
    /// Two bits, see [`builtin_class`].
    pub builtin_class: u8,

    // Fields.
    pub bit_field: bool,
    pub nonaddressable: bool,

    // Labels.
    pub forced_label: bool,
    pub error_issued: bool,

    // Parameters and results.
    pub by_reference: bool,
}
