//! PowerPC CPU intrinsics.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_arch = "powerpc64", feature(asm_experimental_arch))]

pub mod intrin;
