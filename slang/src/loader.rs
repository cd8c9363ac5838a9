/// Script entry points used by the command line.
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::{
    code::Node,
    codedump,
    config::RuntimeSettings,
    error::{RuntimeError, ScriptError},
    parser::parse_source_file,
    runtime::Runtime,
    value::Value,
};

/// Module name of a script file: its stem.
pub fn module_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `path` itself if it exists, else `path` with the binary extension,
/// else with the source extension.
pub fn locate_script(path: &Path, settings: &RuntimeSettings) -> PathBuf {
    if path.is_file() {
        return path.to_path_buf();
    }
    [&settings.binary_ext, &settings.source_ext]
        .into_iter()
        .map(|ext| {
            let mut file = path.as_os_str().to_owned();
            file.push(ext);
            PathBuf::from(file)
        })
        .find(|candidate| candidate.is_file())
        .unwrap_or_else(|| path.to_path_buf())
}

/// Nodes of a `.sc` file or of a source file, chosen by extension.
pub fn load_script(path: &Path, settings: &RuntimeSettings) -> Result<Vec<Node>, ScriptError> {
    let binary = settings.binary_ext.trim_start_matches('.');
    if path.extension().is_some_and(|ext| ext == binary) {
        return codedump::load_file(path).map_err(|source| ScriptError::Load {
            path: path.display().to_string(),
            source,
        });
    }
    Ok(parse_source_file(path)?)
}

/// Run the first node of `path` with `args` passed as one table
/// `{"1": arg1, "2": arg2, ...}`.
pub fn run_script(
    path: &Path,
    args: &[String],
    settings: RuntimeSettings,
) -> Result<(), ScriptError> {
    let nodes = load_script(path, &settings)?;
    let name = module_name(path);
    let data_path = settings.data_path();
    let mut rt = Runtime::new(settings).map_err(|source| ScriptError::Load {
        path: data_path.display().to_string(),
        source,
    })?;

    let module = rt.load_module_from_nodes(&name, nodes);
    let first = module.borrow().first();
    let first = first.ok_or_else(|| ScriptError::Empty(path.display().to_string()))?;
    rt.set_current_module(Some(module));

    let table = Value::table();
    if let Some(t) = table.as_table() {
        for (i, arg) in args.iter().enumerate() {
            t.insert((i + 1).to_string(), Value::str(arg.as_bytes()));
        }
    }
    let target = format!(".{name}.{}", first.name);
    info!("running {target} with {} args", args.len());
    rt.call_node(&target, &[table], &mut [])?;
    rt.flush().map_err(RuntimeError::from)?;
    Ok(())
}

/// Parse `src` and write its nodes next to it with the binary extension.
pub fn compile_file(src: &Path, settings: &RuntimeSettings) -> Result<PathBuf, ScriptError> {
    let nodes = parse_source_file(src)?;
    let out = src.with_extension(settings.binary_ext.trim_start_matches('.'));
    codedump::dump_file(&out, &nodes).map_err(|source| ScriptError::Load {
        path: out.display().to_string(),
        source,
    })?;
    debug!("compiled {} to {}", src.display(), out.display());
    Ok(out)
}

/// Code listing of every node in `path`.
pub fn listing(path: &Path, settings: &RuntimeSettings) -> Result<String, ScriptError> {
    let nodes = load_script(path, settings)?;
    Ok(nodes.iter().map(Node::to_string).collect())
}
