//! Calling-convention register assignments per target OS family.

use crate::config::TargetOs;

use super::operand::Register;

/// Registers carrying the first four integer arguments and the result for
/// the target's native calling convention.
///
/// Helper stubs are written against these abstract slots so the same
/// emission logic serves both recognized ABIs. The result register is RAX
/// under both conventions, which lets ABI-parametric helpers hand a value
/// back without knowing which family they were emitted for.
///
/// The map is built once per target and never changes afterwards. The set
/// of OS families is closed; anything else is rejected when the target
/// description is constructed, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetRegisterMap {
    pub arg0: Register,
    pub arg1: Register,
    pub arg2: Register,
    pub arg3: Register,
    pub result: Register,
}

impl TargetRegisterMap {
    /// Resolve the register map for an OS family.
    pub fn for_os(os: TargetOs) -> TargetRegisterMap {
        match os {
            // Four-register fastcall-like convention.
            TargetOs::Windows => TargetRegisterMap {
                arg0: Register::RCX,
                arg1: Register::RDX,
                arg2: Register::R8,
                arg3: Register::R9,
                result: Register::RAX,
            },
            // System V AMD64.
            TargetOs::Linux | TargetOs::Macos => TargetRegisterMap {
                arg0: Register::RDI,
                arg1: Register::RSI,
                arg2: Register::RDX,
                arg3: Register::RCX,
                result: Register::RAX,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_register_matches_across_families() {
        let win = TargetRegisterMap::for_os(TargetOs::Windows);
        let sysv = TargetRegisterMap::for_os(TargetOs::Linux);
        assert_eq!(win.result, sysv.result);
        assert_eq!(win.result, Register::RAX);
    }

    #[test]
    fn test_argument_registers_are_distinct() {
        for os in [TargetOs::Windows, TargetOs::Linux, TargetOs::Macos] {
            let map = TargetRegisterMap::for_os(os);
            let regs = [map.arg0, map.arg1, map.arg2, map.arg3];
            for (i, a) in regs.iter().enumerate() {
                for b in regs.iter().skip(i + 1) {
                    assert_ne!(a, b);
                }
            }
        }
    }

    #[test]
    fn test_macos_uses_sysv() {
        assert_eq!(
            TargetRegisterMap::for_os(TargetOs::Macos),
            TargetRegisterMap::for_os(TargetOs::Linux)
        );
    }
}
