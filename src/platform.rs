//! Constants of the targeted host build.

use crate::{
    config::Features,
    container::ListLayout,
    symbol::{CallingConvention, Symbol},
};

/// Separator for paths handed to the host
#[cfg(windows)]
pub const PATH_SEPARATOR: &str = "\\";
/// Separator for paths handed to the host
#[cfg(not(windows))]
pub const PATH_SEPARATOR: &str = "/";

/// Lua memory usage query (`int lGetMemoryUsage(lua_State*)`), a free function
pub const L_GET_MEMORY_USAGE: Symbol =
    Symbol::new("lGetMemoryUsage", CallingConvention::Cdecl).with_feature(Features::MULTIPLAYER);

/// Member function switching the active DLC and mod set
pub const SET_ACTIVE_DLC_AND_MODS: Symbol =
    Symbol::new("SetActiveDLCAndMods", CallingConvention::Thiscall)
        .with_feature(Features::MULTIPLAYER);

/// Every host symbol declared above
pub const HOST_SYMBOLS: &[Symbol] = &[L_GET_MEMORY_USAGE, SET_ACTIVE_DLC_AND_MODS];

/// Layout of the host's `std::list` (32-bit MSVC)
pub const HOST_LIST_LAYOUT: ListLayout = ListLayout::msvc_x86();
