//! Git repository reader.
//!
//! URLs name a repo and a path within it, delimited by `//`:
//! `git+https://github.com/org/repo//config/defaults.yaml#branch`. The repo
//! is shallow-cloned into a temporary directory with the `git` CLI and the
//! requested path is read from the worktree. The URL fragment selects a
//! branch or tag; with no fragment the remote HEAD decides.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::Command;

use base64::Engine;
use url::Url;

use crate::data::Data;
use crate::error::Result;
use crate::mime;
use crate::readers::{at_most_one_arg, Reader};
use crate::source::Source;
use crate::urls::path_join;

pub struct GitReader;

impl Reader for GitReader {
    fn read(&self, _data: &Data, source: &Source, args: &[String]) -> Result<Vec<u8>> {
        let arg = at_most_one_arg(source.url().scheme(), args)?;
        let (repo_url, path) = parse_git_path(source.url(), arg)?;

        // shallow clones of local repos tend to fail
        let shallow = repo_url.scheme() != "git+file";

        let workdir = tempfile::tempdir().map_err(anyhow::Error::from)?;
        clone(&repo_url, workdir.path(), shallow)?;

        let target = workdir.path().join(path.trim_start_matches('/'));
        if target.is_dir() || path.ends_with('/') {
            let mut names: Vec<String> = fs::read_dir(&target)
                .map_err(|e| anyhow::anyhow!("couldn't list {path} in {repo_url}: {e}"))?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .filter(|name| name != ".git")
                .collect();
            names.sort();

            source.set_media_type(mime::JSON_ARRAY_MEDIATYPE);
            return Ok(serde_json::to_vec(&names).map_err(anyhow::Error::from)?);
        }

        source.clear_media_type();
        Ok(fs::read(&target)
            .map_err(|e| anyhow::anyhow!("couldn't read {path} from {repo_url}: {e}"))?)
    }
}

/// Combine the source URL and optional argument into the repo URL to clone
/// and the path to read within it. The path is delimited from the repo by
/// `//`; an argument is joined onto whichever side the delimiter already
/// committed it to.
pub fn parse_git_path(u: &Url, arg: Option<&str>) -> Result<(Url, String)> {
    let mut out = u.clone();

    let orig_path = u.path().to_string();
    let (mut repo_path, mut subpath) = match orig_path.find("//") {
        Some(i) => (orig_path[..i].to_string(), format!("/{}", &orig_path[i + 2..])),
        None => (orig_path.clone(), "/".to_string()),
    };

    if let Some(arg) = arg {
        let (arg_path, arg_query, arg_fragment) = split_arg(arg);

        // when the base URL already fixed the repo/path split, or the arg
        // itself starts with the delimiter, the whole arg is a subpath
        let (repo_part, path_part) = if orig_path.contains("//") || arg_path.starts_with("//") {
            ("", arg_path)
        } else {
            match arg_path.find("//") {
                Some(i) => (&arg_path[..i], &arg_path[i + 1..]),
                None => (arg_path, ""),
            }
        };

        repo_path = path_join(&repo_path, repo_part);
        subpath = path_join(&subpath, path_part);

        if let Some(q) = arg_query {
            let pairs: Vec<(String, String)> = out
                .query_pairs()
                .chain(url::form_urlencoded::parse(q.as_bytes()))
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            if pairs.is_empty() {
                out.set_query(None);
            } else {
                out.query_pairs_mut().clear().extend_pairs(pairs);
            }
        }
        if let Some(f) = arg_fragment {
            if !f.is_empty() {
                out.set_fragment(Some(&f));
            }
        }
    }

    out.set_path(&repo_path);
    Ok((out, subpath))
}

// arg -> (path, query, fragment)
fn split_arg(arg: &str) -> (&str, Option<String>, Option<String>) {
    let (rest, fragment) = match arg.split_once('#') {
        Some((r, f)) => (r, Some(f.to_string())),
        None => (arg, None),
    };
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q.to_string())),
        None => (rest, None),
    };
    (path, query, fragment)
}

/// Branch or tag named by the URL fragment. A fragment starting with `refs/`
/// is taken verbatim, anything else is treated as a branch name.
fn ref_from_url(u: &Url) -> Option<String> {
    match u.fragment() {
        Some(f) if f.starts_with("refs/") => Some(f.to_string()),
        Some(f) if !f.is_empty() => Some(format!("refs/heads/{f}")),
        _ => None,
    }
}

/// Ask the remote which ref HEAD points at, so clones don't assume a
/// hard-coded default branch name. Failure is non-fatal.
fn ref_from_remote_head(clone_url: &str, git_env: &[(String, String)]) -> Option<String> {
    let output = Command::new("git")
        .args(["ls-remote", "--symref", clone_url, "HEAD"])
        .envs(git_env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .output()
        .ok()?;
    if !output.status.success() {
        tracing::warn!(
            repo = clone_url,
            "failed to get ref from remote, using default: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout.lines().find_map(|line| {
        let rest = line.strip_prefix("ref: ")?;
        let (target, head) = rest.split_once('\t')?;
        (head == "HEAD").then(|| target.to_string())
    })
}

fn clone(repo_url: &Url, dest: &Path, shallow: bool) -> Result<()> {
    let (clone_url, extra_args, git_env, _key_file) = auth(repo_url)?;

    let reference = ref_from_url(repo_url)
        .or_else(|| ref_from_remote_head(&clone_url, &git_env));

    let result = run_clone(&clone_url, dest, shallow, reference.as_deref(), &extra_args, &git_env);
    match result {
        Err(_) if repo_url.scheme() == "git+file" && !repo_url.path().ends_with(".git") => {
            // maybe this has a `.git` subdirectory
            let retry_url = format!("{clone_url}/.git");
            run_clone(&retry_url, dest, shallow, reference.as_deref(), &extra_args, &git_env)
        }
        other => other,
    }
}

fn run_clone(
    clone_url: &str,
    dest: &Path,
    shallow: bool,
    reference: Option<&str>,
    extra_args: &[String],
    git_env: &[(String, String)],
) -> Result<()> {
    let mut cmd = Command::new("git");
    cmd.arg("clone").args(["--single-branch", "--no-tags", "--quiet"]);
    if shallow {
        cmd.args(["--depth", "1"]);
    }
    if let Some(reference) = reference {
        let short = reference
            .strip_prefix("refs/heads/")
            .or_else(|| reference.strip_prefix("refs/tags/"))
            .unwrap_or(reference);
        cmd.args(["--branch", short]);
    }
    cmd.args(extra_args);
    cmd.arg(clone_url).arg(dest);
    cmd.envs(git_env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    let output = cmd
        .output()
        .map_err(|e| anyhow::anyhow!("couldn't run git: {e}"))?;
    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "git clone for {clone_url} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )
        .into());
    }
    Ok(())
}

type AuthSetup = (String, Vec<String>, Vec<(String, String)>, Option<tempfile::NamedTempFile>);

/// Work out the URL to hand to `git` plus any auth flags or environment.
///
/// HTTP(S) remotes take a password from the URL, `GIT_HTTP_PASSWORD`, or a
/// bearer token from `GIT_HTTP_TOKEN`. SSH remotes use `GIT_SSH_KEY`
/// (base64-encoded or raw) written to a temporary key file, falling back to
/// the ssh agent.
fn auth(repo_url: &Url) -> Result<AuthSetup> {
    let mut url = repo_url.clone();
    url.set_fragment(None);
    url.set_query(None);

    let mut extra_args = Vec::new();
    let mut git_env = Vec::new();
    let mut key_file = None;

    match repo_url.scheme() {
        "git+http" | "git+https" => {
            if url.password().is_none() {
                if let Ok(pass) = std::env::var("GIT_HTTP_PASSWORD") {
                    let _ = url.set_password(Some(&pass));
                } else if let Ok(token) = std::env::var("GIT_HTTP_TOKEN") {
                    extra_args.push("-c".to_string());
                    extra_args.push(format!("http.extraHeader=Authorization: Bearer {token}"));
                }
            }
        }
        "git+ssh" => {
            if let Ok(key) = std::env::var("GIT_SSH_KEY") {
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(key.trim())
                    .unwrap_or_else(|_| key.clone().into_bytes());
                let mut file = tempfile::NamedTempFile::new().map_err(anyhow::Error::from)?;
                file.write_all(&decoded).map_err(anyhow::Error::from)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    fs::set_permissions(file.path(), fs::Permissions::from_mode(0o600))
                        .map_err(anyhow::Error::from)?;
                }
                git_env.push((
                    "GIT_SSH_COMMAND".to_string(),
                    format!("ssh -i {} -o IdentitiesOnly=yes", file.path().display()),
                ));
                key_file = Some(file);
            }
            // otherwise the ssh agent handles it
        }
        _ => {}
    }

    let clone_url = url
        .as_str()
        .strip_prefix("git+")
        .unwrap_or(url.as_str())
        .to_string();
    Ok((clone_url, extra_args, git_env, key_file))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(url: &str, arg: Option<&str>) -> (String, String) {
        let u = Url::parse(url).unwrap();
        let (repo, path) = parse_git_path(&u, arg).unwrap();
        (repo.to_string(), path)
    }

    #[test]
    fn bare_repo_reads_root() {
        let (repo, path) = split("git+https://example.com/foo", None);
        assert_eq!(repo, "git+https://example.com/foo");
        assert_eq!(path, "/");
    }

    #[test]
    fn delimiter_in_url_splits_repo_and_path() {
        let (repo, path) = split("git+https://example.com/org/repo//config/app.yaml", None);
        assert_eq!(repo, "git+https://example.com/org/repo");
        assert_eq!(path, "/config/app.yaml");
    }

    #[test]
    fn arg_extends_repo_until_delimiter() {
        let (repo, path) = split("git+https://example.com/foo", Some("/bar//baz"));
        assert_eq!(repo, "git+https://example.com/foo/bar");
        assert_eq!(path, "/baz");
    }

    #[test]
    fn arg_is_all_subpath_when_url_fixed_the_repo() {
        let (repo, path) = split("git+file:///foo//foo", Some("/bar"));
        assert_eq!(repo, "git+file:///foo");
        assert_eq!(path, "/foo/bar");
    }

    #[test]
    fn double_slash_arg_is_all_subpath() {
        let (repo, path) = split("git+https://example.com/repo", Some("//sub/file.json"));
        assert_eq!(repo, "git+https://example.com/repo");
        assert_eq!(path, "/sub/file.json");
    }

    #[test]
    fn arg_fragment_overrides_ref() {
        let u = Url::parse("git+https://example.com/repo#main").unwrap();
        let (repo, _) = parse_git_path(&u, Some("//file.txt#develop")).unwrap();
        assert_eq!(repo.fragment(), Some("develop"));
    }

    #[test]
    fn ref_from_fragment() {
        let branch = Url::parse("git+https://example.com/repo#develop").unwrap();
        assert_eq!(ref_from_url(&branch).as_deref(), Some("refs/heads/develop"));

        let tag = Url::parse("git+https://example.com/repo#refs/tags/v1.0").unwrap();
        assert_eq!(ref_from_url(&tag).as_deref(), Some("refs/tags/v1.0"));

        let bare = Url::parse("git+https://example.com/repo").unwrap();
        assert_eq!(ref_from_url(&bare), None);
    }

    #[test]
    fn path_join_cleans() {
        assert_eq!(path_join("/foo", "/bar"), "/foo/bar");
        assert_eq!(path_join("/", "/baz"), "/baz");
        assert_eq!(path_join("/a//b", ""), "/a/b");
        assert_eq!(path_join("", "x/./y"), "x/y");
        assert_eq!(path_join("/a/b", "../c"), "/a/c");
    }

    #[test]
    fn clone_url_strips_git_prefix() {
        let u = Url::parse("git+https://example.com/repo?type=json#main").unwrap();
        let (clone_url, _, _, _) = auth(&u).unwrap();
        assert_eq!(clone_url, "https://example.com/repo");
    }

    #[test]
    fn reads_from_local_repo() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        fs::create_dir(&repo).unwrap();
        fs::write(repo.join("hello.txt"), "from git").unwrap();

        let git = |args: &[&str]| {
            let out = Command::new("git")
                .args(args)
                .current_dir(&repo)
                .env("GIT_AUTHOR_NAME", "test")
                .env("GIT_AUTHOR_EMAIL", "test@example.com")
                .env("GIT_COMMITTER_NAME", "test")
                .env("GIT_COMMITTER_EMAIL", "test@example.com")
                .output()
                .unwrap();
            assert!(out.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&out.stderr));
        };
        git(&["init", "--quiet"]);
        git(&["add", "."]);
        git(&["commit", "--quiet", "-m", "init"]);

        let url = Url::parse(&format!("git+file://{}//hello.txt", repo.display())).unwrap();
        let data = Data::new();
        let source = Source::new("repo", url, vec![]);
        let bytes = GitReader.read(&data, &source, &[]).unwrap();
        assert_eq!(bytes, b"from git");
    }
}
