use dirs::home_dir;
use std::io;
use std::path::PathBuf;

/// Environment variable that overrides the Codeforge home directory.
pub const CODEFORGE_HOME_ENV: &str = "CODEFORGE_HOME";

/// Directory name used under the user's home when no override is set.
const DEFAULT_DIR_NAME: &str = ".codeforge";

/// Returns the Codeforge home directory, where `config.toml` lives.
///
/// `$CODEFORGE_HOME` must name an existing directory and is returned
/// canonicalized. Without it the default `~/.codeforge` is returned whether or
/// not it exists yet.
pub fn find_codeforge_home() -> io::Result<PathBuf> {
    let env_value = std::env::var(CODEFORGE_HOME_ENV)
        .ok()
        .filter(|val| !val.is_empty());
    find_codeforge_home_from_env(env_value.as_deref())
}

fn find_codeforge_home_from_env(env_value: Option<&str>) -> io::Result<PathBuf> {
    let Some(val) = env_value else {
        let mut path = home_dir().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "Could not find home directory")
        })?;
        path.push(DEFAULT_DIR_NAME);
        return Ok(path);
    };

    let path = PathBuf::from(val);
    let metadata = std::fs::metadata(&path).map_err(|err| {
        let message = if err.kind() == io::ErrorKind::NotFound {
            format!("{CODEFORGE_HOME_ENV} points to {val:?}, but that path does not exist")
        } else {
            format!("failed to read {CODEFORGE_HOME_ENV} {val:?}: {err}")
        };
        io::Error::new(err.kind(), message)
    })?;
    if !metadata.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{CODEFORGE_HOME_ENV} points to {val:?}, but that path is not a directory"),
        ));
    }
    path.canonicalize().map_err(|err| {
        io::Error::new(
            err.kind(),
            format!("failed to canonicalize {CODEFORGE_HOME_ENV} {val:?}: {err}"),
        )
    })
}
