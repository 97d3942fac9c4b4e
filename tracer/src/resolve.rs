// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::{bail, Result};
use binview::elf::ElfType;
use binview::{Address, ElfView, Offset};

use crate::TraceError;

/// Runtime address of symbol `name` in an image loaded at `base`.
///
/// Position-independent executables and shared objects place symbols at
/// image-relative values, so the load base is added; traditional
/// executables carry absolute values already.
pub fn runtime_address(elf: &ElfView, base: Address, name: &str) -> Result<Address> {
    elf.require_native()?;

    let value = elf.resolve(name).ok_or_else(|| TraceError::SymbolNotFound {
        name: name.to_owned(),
    })?;

    compose(elf.elf_type(), base, value)
}

pub(crate) fn compose(elf_type: ElfType, base: Address, value: Address) -> Result<Address> {
    match elf_type {
        ElfType::SharedObject => base.offset_by(Offset(value.0)),
        ElfType::Executable => Ok(value),
        other => bail!("cannot resolve runtime addresses in ELF type {other}"),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_pie_composition() {
        let addr = compose(ElfType::SharedObject, Address(0x5555_5555_4000), Address(0x1234))
            .unwrap();
        assert_eq!(addr, Address(0x5555_5555_5234));
    }

    #[test]
    fn test_fixed_executable_is_absolute() {
        let addr = compose(ElfType::Executable, Address(0x5555_5555_4000), Address(0x401234))
            .unwrap();
        assert_eq!(addr, Address(0x401234));
    }

    #[test]
    fn test_relocatable_rejected() {
        assert!(compose(ElfType::Relocatable, Address(0), Address(0x10)).is_err());
    }

    #[test]
    fn test_pie_composition_overflow() {
        assert!(compose(ElfType::SharedObject, Address(u64::MAX), Address(2)).is_err());
    }
}
