//! Inspection of plugin binaries before they are loaded.

use anyhow::{bail, Context, Result};

use std::path::Path;

/// Collect all symbols exported by the binary that start with `prefix`.
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub fn find_export_by_prefix(path: impl AsRef<Path>, prefix: &str) -> Result<Vec<String>> {
    use goblin::elf::Elf;

    let buffer = std::fs::read(path.as_ref())?;
    let elf = Elf::parse(buffer.as_slice())?;

    let dynamic = elf
        .dynsyms
        .iter()
        .filter_map(|s| elf.dynstrtab.get_at(s.st_name));

    let stat = elf.syms.iter().filter_map(|s| elf.strtab.get_at(s.st_name));

    let mut names = dynamic
        .chain(stat)
        .filter(|name| name.starts_with(prefix))
        .map(str::to_owned)
        .collect::<Vec<_>>();

    names.sort();
    names.dedup();

    Ok(names)
}

/// Collect all symbols exported by the binary that start with `prefix`.
#[cfg(target_os = "windows")]
pub fn find_export_by_prefix(path: impl AsRef<Path>, prefix: &str) -> Result<Vec<String>> {
    use goblin::pe::PE;

    let buffer = std::fs::read(path.as_ref())?;
    let pe = PE::parse(buffer.as_slice())?;

    Ok(pe
        .exports
        .iter()
        .filter_map(|s| s.name)
        .filter(|name| name.starts_with(prefix))
        .map(str::to_owned)
        .collect::<Vec<_>>())
}

/// Collect all symbols exported by the binary that start with `prefix`.
#[cfg(target_os = "macos")]
pub fn find_export_by_prefix(path: impl AsRef<Path>, prefix: &str) -> Result<Vec<String>> {
    use anyhow::anyhow;
    use goblin::mach::Mach;

    let buffer = std::fs::read(path.as_ref())?;
    let mach = Mach::parse(buffer.as_slice())?;

    let macho = match mach {
        Mach::Binary(mach) => mach,
        Mach::Fat(mach) => (0..mach.narches)
            .filter_map(|i| mach.get(i).ok())
            .next()
            .ok_or_else(|| anyhow!("failed to find valid MachO header!"))?,
    };

    // macho symbols are prefixed with `_` in the object file.
    let macho_prefix = "_".to_owned() + prefix;
    Ok(macho
        .symbols
        .ok_or_else(|| anyhow!("failed to parse MachO symbols!"))?
        .iter()
        .filter_map(|s| s.ok())
        .filter_map(|(name, _)| {
            if name.starts_with(&macho_prefix) {
                Some(name[1..].to_owned())
            } else {
                None
            }
        })
        .collect::<Vec<_>>())
}

/// Verify that the binary at `path` exports every symbol in `entry_points`.
pub fn check_entry_points(path: impl AsRef<Path>, entry_points: &[&str]) -> Result<()> {
    let path = path.as_ref();

    let exports = find_export_by_prefix(path, "")
        .with_context(|| format!("cannot inspect plugin {}", path.display()))?;

    let missing = entry_points
        .iter()
        .filter(|&&e| !exports.iter().any(|x| x == e))
        .copied()
        .collect::<Vec<_>>();

    if !missing.is_empty() {
        bail!(
            "plugin {} does not export {}",
            path.display(),
            missing.join(", ")
        );
    }

    Ok(())
}
