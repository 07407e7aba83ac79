use anyhow::{bail, Context, Result};
use glob::glob;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Archivos regulares que matchean un patrón glob, ordenados.
pub fn glob_files(pattern: &str) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();

    for entry in glob(pattern).with_context(|| format!("patrón glob inválido: {pattern}"))? {
        if let Ok(path) = entry {
            if path.is_file() {
                out.push(path);
            }
        }
    }

    out.sort();
    Ok(out)
}

/// Primer archivo existente entre los candidatos, en orden. Cada candidato
/// puede ser una ruta literal o un patrón glob (ej: `data/raw/view_log_*.csv`).
pub fn find_raw_file<S: AsRef<str>>(candidates: &[S]) -> Result<PathBuf> {
    for cand in candidates {
        let cand = cand.as_ref();
        debug!("buscando archivo crudo en {}", cand);

        let literal = Path::new(cand);
        if literal.is_file() {
            return Ok(literal.to_path_buf());
        }

        if let Some(first) = glob_files(cand)?.into_iter().next() {
            return Ok(first);
        }
    }

    let listed: Vec<&str> = candidates.iter().map(|c| c.as_ref()).collect();
    bail!(
        "no se encontró el archivo crudo en ninguna ubicación esperada:\n{}",
        listed.join("\n")
    )
}
