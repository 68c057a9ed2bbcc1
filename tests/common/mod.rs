//! Shared helpers for the integration tests: the crate's canned-response
//! stand-in for the match authority (compiled from the same source the
//! unit tests use, so the two cannot drift), and in-memory tar archives
//! for player code.

#[allow(dead_code)]
#[path = "../../src/test_support.rs"]
mod test_support;

pub use test_support::StubAuthority;

/// A tar archive containing a single `run.sh` with the given contents.
pub fn bundle_tar(run_sh: &str) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(run_sh.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder
        .append_data(&mut header, "run.sh", run_sh.as_bytes())
        .unwrap();
    builder.into_inner().unwrap()
}
