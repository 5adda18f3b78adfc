//! Shared test infrastructure for integration tests.
//!
//! Tests drive a fake `terraform` shell script that honours the subset of
//! the CLI the orchestrator uses: `-chdir`, detailed exit codes, plan files,
//! state overrides and backups, JSON output and the plugin cache variable.
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tfpipe::orchestrator::Orchestrator;
use tfpipe::runner::{CaptureSink, Terraform};
use tfpipe::workspace::Workspace;

pub const FAKE_VERSION: &str = "Terraform v1.5.7";

const FAKE_TERRAFORM: &str = r#"#!/bin/sh
if [ "$TF_IN_AUTOMATION" != "1" ]; then
  echo "TF_IN_AUTOMATION is not set" >&2
  exit 9
fi
case "$1" in
  -chdir=*) cd "${1#-chdir=}" || exit 9; shift ;;
esac
verb="$1"
shift
detailed=0
out=""
state="terraform.tfstate"
destroy=0
approve=0
positional=""
for arg in "$@"; do
  case "$arg" in
    -detailed-exitcode) detailed=1 ;;
    -out=*) out="${arg#-out=}" ;;
    -state=*) state="${arg#-state=}" ;;
    -destroy) destroy=1 ;;
    -auto-approve) approve=1 ;;
    -backend-config=*) echo "${arg#-backend-config=}" >> .backend-config ;;
    -var-file=*) echo "using var file ${arg#-var-file=}" ;;
    -input=false|-json) ;;
    -*) echo "unknown flag $arg" >&2; exit 9 ;;
    *) positional="$arg" ;;
  esac
done
applied=0
if [ -f "$state" ] && grep -q applied "$state"; then
  applied=1
fi
case "$verb" in
  version)
    echo "__VERSION__"
    ;;
  init)
    if [ -n "$TF_PLUGIN_CACHE_DIR" ]; then
      mkdir -p "$TF_PLUGIN_CACHE_DIR"
      echo provider > "$TF_PLUGIN_CACHE_DIR/terraform-provider-null"
    fi
    echo "Terraform has been successfully initialized!"
    ;;
  plan)
    if [ -f invalid.tf ]; then
      echo "Error: Invalid configuration" >&2
      exit 1
    fi
    changes=$((1 - applied))
    if [ "$destroy" = 1 ]; then
      changes=$applied
    fi
    if [ -n "$out" ]; then
      echo "plan changes=$changes destroy=$destroy" > "$out"
    fi
    if [ "$changes" = 1 ]; then
      echo "Plan: 1 to add, 0 to change, 0 to destroy."
      if [ "$detailed" = 1 ]; then
        exit 2
      fi
      exit 0
    fi
    echo "No changes. Your infrastructure matches the configuration."
    exit 0
    ;;
  apply)
    if [ -n "$positional" ]; then
      if [ ! -f "$positional" ]; then
        echo "Error: plan file $positional not found" >&2
        exit 1
      fi
    elif [ "$approve" != 1 ]; then
      echo "Error: apply requires approval" >&2
      exit 1
    fi
    if [ -f "$state" ]; then
      cp "$state" "$state.backup"
    fi
    echo '{"status": "applied"}' > "$state"
    if [ -f invalid.tf ]; then
      echo "Error: apply failed part way" >&2
      exit 1
    fi
    echo "Apply complete! Resources: 1 added, 0 changed, 0 destroyed."
    ;;
  show)
    cat "$positional"
    ;;
  output)
    echo "Warning: output formatting is deprecated" >&2
    if [ "$applied" = 1 ]; then
      echo '{"algorithm": {"sensitive": false, "type": "string", "value": "RSA"}, "bits": {"sensitive": false, "type": "number", "value": 4096}}'
    else
      echo '{}'
    fi
    ;;
  *)
    echo "unknown verb $verb" >&2
    exit 9
    ;;
esac
"#;

/// Write the fake tool into `dir` and return its path.
pub fn fake_terraform(dir: &Path) -> PathBuf {
    let path = dir.join("terraform");
    fs::write(&path, FAKE_TERRAFORM.replace("__VERSION__", FAKE_VERSION))
        .expect("write fake terraform");
    let mut perms = fs::metadata(&path).expect("stat fake terraform").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod fake terraform");
    path
}

pub fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent directory");
    }
    fs::write(path, contents.as_bytes()).expect("write file");
}

/// A temp root holding the fake tool, a source tree and work dirs.
pub struct Harness {
    pub tmp: TempDir,
    pub terraform: PathBuf,
    pub source: PathBuf,
    pub sink: CaptureSink,
}

impl Harness {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let bin_dir = tmp.path().join("bin");
        fs::create_dir_all(&bin_dir).expect("create bin dir");
        let terraform = fake_terraform(&bin_dir);
        let source = tmp.path().join("source");
        write_file(
            &source.join("main.tf"),
            "resource \"null_resource\" \"example\" {}\n",
        );
        Self {
            tmp,
            terraform,
            source,
            sink: CaptureSink::default(),
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.tmp.path().join(rel)
    }

    /// Orchestrator over `<tmp>/<work_dir>/terraform`, capturing tool output.
    pub fn orchestrator(&self, work_dir: &str) -> Orchestrator {
        let workspace = Workspace::in_work_dir(&self.path(work_dir)).expect("workspace");
        Orchestrator::new(Terraform::new(&self.terraform), workspace).with_sink(self.sink.clone())
    }

    pub fn output_contains(&self, needle: &str) -> bool {
        self.sink.lines().iter().any(|line| line.contains(needle))
    }
}
