//! Scripted stand-in for exiftool used by the integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use streat::Settings;
use tempfile::TempDir;

/// Speaks the stay-open protocol: reads command lines until `-execute`,
/// then replies with the size of the named file. Files smaller than the
/// first argument get an `Error` tag. When the token file named by the
/// second argument exists, it is removed and the worker dies on the next
/// `-execute`. The third argument works the same way but leaves that
/// command unanswered. A bare `crash` line kills it immediately.
const SCRIPT: &str = r#"need=$1
token=$2
hang=$3
count=0
file=
while IFS= read -r line; do
  case "$line" in
    -execute)
      if [ -n "$token" ] && [ -f "$token" ]; then
        rm -f "$token"
        exit 3
      fi
      if [ -n "$hang" ] && [ -f "$hang" ]; then
        rm -f "$hang"
        continue
      fi
      count=$((count + 1))
      size=$(wc -c < "$file" | tr -d ' ')
      if [ "$size" -ge "$need" ]; then
        printf '[{"SourceFile":"%s","FileSize":%s,"Command":%s,"Warning":"fake worker"}]\n' "$file" "$size" "$count"
      else
        printf '[{"SourceFile":"%s","FileSize":%s,"Command":%s,"Error":"File format error"}]\n' "$file" "$size" "$count"
      fi
      printf '{ready}\n'
      ;;
    crash)
      exit 3
      ;;
    -*)
      ;;
    *)
      file=$line
      ;;
  esac
done
"#;

/// A buffer size the fake worker is never satisfied with.
pub const NEVER: u64 = 1 << 40;

pub struct FakeWorker {
    dir: TempDir,
    script: PathBuf,
}

impl FakeWorker {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake_worker.sh");
        std::fs::write(&script, SCRIPT).unwrap();
        Self { dir, script }
    }

    /// Settings for a worker that succeeds once the buffer holds `need` bytes.
    pub fn settings(&self, need: u64) -> Settings {
        let mut settings = Settings::default();
        settings.worker.program = "sh".to_string();
        settings.worker.args = vec![
            self.script.display().to_string(),
            need.to_string(),
            self.token().display().to_string(),
            self.hang_token().display().to_string(),
        ];
        settings.worker.restart_backoff_ms = 100;
        settings.extract.scratch_dir = Some(self.dir.path().to_path_buf());
        settings
    }

    /// Make the worker die on its next command.
    pub fn arm_crash(&self) {
        std::fs::write(self.token(), b"").unwrap();
    }

    /// Make the worker ignore its next command.
    pub fn arm_hang(&self) {
        std::fs::write(self.hang_token(), b"").unwrap();
    }

    /// Whether the armed hang has been used up.
    pub fn hang_taken(&self) -> bool {
        !self.hang_token().exists()
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    fn token(&self) -> PathBuf {
        self.dir.path().join("crash.token")
    }

    fn hang_token(&self) -> PathBuf {
        self.dir.path().join("hang.token")
    }
}

/// Deterministic source bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
