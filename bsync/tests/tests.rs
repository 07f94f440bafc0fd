//! End-to-end runs of `bsync` against directory buckets (`file://` endpoints)

use predicates::prelude::*;

const FILES: &[(&str, &str)] = &[
    ("master.m3u8", "#EXTM3U"),
    ("poster.jpg", "jpeg bytes"),
    ("stream_0/data000.ts", "segment 0"),
    ("stream_0/index.m3u8", "#EXTM3U\n#EXTINF:4.0"),
];

fn bsync() -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("bsync").unwrap();
    for var in [
        "R2_BUCKET_NAME",
        "R2_ACCOUNT_ID",
        "R2_ACCESS_KEY_ID",
        "R2_SECRET_ACCESS_KEY",
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
        "BSYNC_TARGETS",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn write_tree(root: &std::path::Path) {
    for (rel, contents) in FILES {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
}

fn assert_tree(root: &std::path::Path) {
    for (rel, contents) in FILES {
        let path = root.join(rel);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            *contents,
            "{path:?}"
        );
    }
}

/// Directory holding one subdirectory per bucket
struct Cloud {
    dir: tempfile::TempDir,
}

impl Cloud {
    fn new(buckets: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for bucket in buckets {
            std::fs::create_dir(dir.path().join(bucket)).unwrap();
        }
        Self { dir }
    }

    fn endpoint(&self) -> String {
        format!("file://{}", self.dir.path().display())
    }

    fn target(&self, bucket: &str) -> String {
        format!("local:{bucket}@{}", self.endpoint())
    }

    fn bucket(&self, bucket: &str) -> std::path::PathBuf {
        self.dir.path().join(bucket)
    }
}

#[test]
fn check_bsync_help() {
    bsync().arg("--help").assert().success();
}

#[test]
fn download_prefix_into_directory() {
    let cloud = Cloud::new(&["media"]);
    write_tree(&cloud.bucket("media").join("videos/suit-yourself"));
    let into = tempfile::tempdir().unwrap();
    bsync()
        .args([
            "download",
            "videos/suit-yourself",
            "--into",
            into.path().to_str().unwrap(),
            "--origin-bucket",
            "media",
            "--origin-endpoint",
            &cloud.endpoint(),
            "--summary",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("transfers attempted: 4"));
    assert_tree(&into.path().join("suit-yourself"));
}

#[test]
fn download_origin_from_environment() {
    let cloud = Cloud::new(&["media"]);
    write_tree(&cloud.bucket("media").join("suit-yourself"));
    let into = tempfile::tempdir().unwrap();
    bsync()
        .env("R2_BUCKET_NAME", "media")
        .args([
            "download",
            "suit-yourself",
            "--into",
            into.path().to_str().unwrap(),
            "--origin-endpoint",
            &cloud.endpoint(),
        ])
        .assert()
        .success();
    assert_tree(&into.path().join("suit-yourself"));
}

#[test]
fn upload_uses_directory_name_as_prefix() {
    let source = tempfile::tempdir().unwrap();
    let movie = source.path().join("suit-yourself");
    write_tree(&movie);
    let cloud = Cloud::new(&["media-us"]);
    bsync()
        .args([
            "upload",
            movie.to_str().unwrap(),
            "--target",
            &cloud.target("media-us"),
        ])
        .assert()
        .success();
    assert_tree(&cloud.bucket("media-us").join("suit-yourself"));
}

#[test]
fn upload_with_explicit_prefix() {
    let source = tempfile::tempdir().unwrap();
    write_tree(source.path());
    let cloud = Cloud::new(&["media-us"]);
    bsync()
        .args([
            "upload",
            source.path().to_str().unwrap(),
            "--prefix",
            "videos/renamed",
            "--target",
            &cloud.target("media-us"),
        ])
        .assert()
        .success();
    assert_tree(&cloud.bucket("media-us").join("videos/renamed"));
}

#[test]
fn replicate_to_every_target() {
    let source = tempfile::tempdir().unwrap();
    let movie = source.path().join("suit-yourself");
    write_tree(&movie);
    let cloud = Cloud::new(&["media-us", "media-eu", "media-ap"]);
    bsync()
        .args([
            "replicate",
            movie.to_str().unwrap(),
            "--target",
            &cloud.target("media-us"),
            "--target",
            &cloud.target("media-eu"),
            "--target",
            &cloud.target("media-ap"),
            "--max-in-flight",
            "2",
            "--summary",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("replication: success"));
    for bucket in ["media-us", "media-eu", "media-ap"] {
        assert_tree(&cloud.bucket(bucket).join("suit-yourself"));
    }
}

#[test]
fn replicate_rerun_overwrites() {
    let source = tempfile::tempdir().unwrap();
    let movie = source.path().join("suit-yourself");
    write_tree(&movie);
    let cloud = Cloud::new(&["media-us"]);
    let run = || {
        bsync()
            .args([
                "replicate",
                movie.to_str().unwrap(),
                "--target",
                &cloud.target("media-us"),
            ])
            .assert()
            .success();
    };
    run();
    std::fs::write(movie.join("master.m3u8"), "#EXTM3U\n#EXT-X-VERSION:3").unwrap();
    run();
    assert_eq!(
        std::fs::read_to_string(cloud.bucket("media-us").join("suit-yourself/master.m3u8"))
            .unwrap(),
        "#EXTM3U\n#EXT-X-VERSION:3"
    );
}

#[test]
fn replicate_aborts_when_a_target_is_missing() {
    let source = tempfile::tempdir().unwrap();
    let movie = source.path().join("suit-yourself");
    write_tree(&movie);
    // media-eu is never created, its preflight check fails
    let cloud = Cloud::new(&["media-us"]);
    bsync()
        .args([
            "replicate",
            movie.to_str().unwrap(),
            "--target",
            &cloud.target("media-us"),
            "--target",
            &cloud.target("media-eu"),
            "--summary",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("preflight failed for 1 target(s)"));
    assert!(!cloud.bucket("media-us").join("suit-yourself").exists());
}

#[test]
fn replicate_missing_source_fails() {
    let cloud = Cloud::new(&["media-us"]);
    bsync()
        .args([
            "replicate",
            "/this/path/does/not/exist",
            "--target",
            &cloud.target("media-us"),
        ])
        .assert()
        .failure();
}

#[test]
fn mirror_stages_and_cleans_up() {
    let cloud = Cloud::new(&["media", "media-us", "media-eu"]);
    write_tree(&cloud.bucket("media").join("videos/suit-yourself"));
    let staging = tempfile::tempdir().unwrap();
    bsync()
        .args([
            "mirror",
            "videos/suit-yourself",
            "--origin-bucket",
            "media",
            "--origin-endpoint",
            &cloud.endpoint(),
            "--target",
            &cloud.target("media-us"),
            "--target",
            &cloud.target("media-eu"),
            "--staging-dir",
            staging.path().to_str().unwrap(),
            "--summary",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("mirror: success"));
    for bucket in ["media-us", "media-eu"] {
        assert_tree(&cloud.bucket(bucket).join("suit-yourself"));
    }
    assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
}

#[test]
fn mirror_of_missing_origin_bucket_fails() {
    let cloud = Cloud::new(&["media-us"]);
    let staging = tempfile::tempdir().unwrap();
    bsync()
        .args([
            "mirror",
            "suit-yourself",
            "--origin-bucket",
            "media",
            "--origin-endpoint",
            &cloud.endpoint(),
            "--target",
            &cloud.target("media-us"),
            "--staging-dir",
            staging.path().to_str().unwrap(),
        ])
        .assert()
        .failure();
    assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
    assert_eq!(
        std::fs::read_dir(cloud.bucket("media-us")).unwrap().count(),
        0
    );
}

#[test]
fn verbose_logs_never_print_secret_keys() {
    let source = tempfile::tempdir().unwrap();
    let movie = source.path().join("suit-yourself");
    write_tree(&movie);
    let cloud = Cloud::new(&["media-us"]);
    let target_secret = "target-secret-3f9c1d";
    let origin_secret = "origin-secret-7b2e4a";
    bsync()
        .env("AWS_ACCESS_KEY_ID", "AKIATARGET")
        .env("AWS_SECRET_ACCESS_KEY", target_secret)
        .env("R2_ACCESS_KEY_ID", "AKIAORIGIN")
        .env("R2_SECRET_ACCESS_KEY", origin_secret)
        .args([
            "-vvv",
            "replicate",
            movie.to_str().unwrap(),
            "--target",
            &cloud.target("media-us"),
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains(target_secret).not())
        .stderr(predicate::str::contains(origin_secret).not())
        .stdout(predicate::str::contains(target_secret).not());
    assert_tree(&cloud.bucket("media-us").join("suit-yourself"));
}
