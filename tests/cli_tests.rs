use std::fs;
use std::process::Command;

fn sample() -> Vec<u8> {
    (0..150_000u32).map(|i| ((i / 4) % 97) as u8).collect()
}

#[test]
fn compress_roundtrip_cli() {
    let exe = env!("CARGO_BIN_EXE_chunkbatch");
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.bin");
    let output = dir.path().join("output.bin");
    fs::write(&input, sample()).unwrap();

    for format in ["snappy", "lz4", "cascaded", "deflate"] {
        let compressed = dir.path().join(format!("{format}.cbat"));
        let status = Command::new(exe)
            .args([
                "compress",
                input.to_str().unwrap(),
                compressed.to_str().unwrap(),
                "--format",
                format,
                "--chunk-size",
                "16384",
                "--checksum",
                "verify",
            ])
            .status()
            .expect("compress failed");
        assert!(status.success(), "{format}");

        let status = Command::new(exe)
            .args(["decompress", compressed.to_str().unwrap(), output.to_str().unwrap()])
            .status()
            .expect("decompress failed");
        assert!(status.success(), "{format}");
        assert_eq!(fs::read(&output).unwrap(), sample());
    }
}

#[test]
fn config_file_sets_chunk_size() {
    let exe = env!("CARGO_BIN_EXE_chunkbatch");
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.bin");
    let config = dir.path().join("config.json");
    let compressed = dir.path().join("out.cbat");
    fs::write(&input, sample()).unwrap();
    fs::write(&config, r#"{"chunk_size": 10000, "checksum_mode": "compute_and_no_verify"}"#).unwrap();

    let status = Command::new(exe)
        .args(["compress", input.to_str().unwrap(), compressed.to_str().unwrap()])
        .args(["--config", config.to_str().unwrap()])
        .status()
        .unwrap();
    assert!(status.success());
    let header = chunkbatch::CommonHeader::parse(&fs::read(&compressed).unwrap()).unwrap();
    assert_eq!(header.uncompressed_chunk_size, 10_000);
    assert_eq!(header.num_chunks, 15);
    assert_eq!(header.checksum_mode().unwrap(), chunkbatch::ChecksumMode::ComputeAndNoVerify);
}

#[test]
fn cli_errors_exit_nonzero() {
    let exe = env!("CARGO_BIN_EXE_chunkbatch");
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("garbage.cbat");
    let wrong_ext = dir.path().join("garbage.bin");
    fs::write(&bad, [0u8; 100]).unwrap();
    fs::write(&wrong_ext, [0u8; 100]).unwrap();
    let out = dir.path().join("out");

    let result = Command::new(exe)
        .args(["decompress", bad.to_str().unwrap(), out.to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(result.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&result.stderr).contains("chunkbatch stream"));

    let result = Command::new(exe)
        .args(["decompress", wrong_ext.to_str().unwrap(), out.to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(result.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&result.stderr).contains(".cbat"));

    let missing = dir.path().join("missing.bin");
    let result = Command::new(exe)
        .args(["compress", missing.to_str().unwrap(), out.to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(result.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&result.stderr).contains("Check that the file exists"));
}

#[test]
fn benchmark_runs_and_reports() {
    let exe = env!("CARGO_BIN_EXE_benchmark_hlif");
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("data.bin");
    let csv = dir.path().join("rows.csv");
    fs::write(&input, sample()).unwrap();

    let result = Command::new(exe)
        .args(["lz4", "-f", input.to_str().unwrap(), "-n", "3", "-m"])
        .output()
        .unwrap();
    assert!(result.status.success());
    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains("compressed ratio"));
    assert!(stdout.contains("compression memory"));

    let result = Command::new(exe)
        .args(["cascaded", "-f", input.to_str().unwrap(), "-t", "int", "-c", "4096"])
        .args(["-r", "1", "-d", "1", "-b", "1", "--json", "-n", "2"])
        .args(["--csv", csv.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(result.status.success());
    let report: serde_json::Value = serde_json::from_slice(&result.stdout).unwrap();
    assert_eq!(report["format"], "cascaded");
    assert_eq!(report["uncompressed_bytes"], 150_000);
    assert_eq!(report["iterations"].as_array().unwrap().len(), 2);
    let rows = csv::Reader::from_path(&csv).unwrap().records().count();
    assert_eq!(rows, 2);

    let result = Command::new(exe)
        .args(["gdeflate", "-f", input.to_str().unwrap(), "--json"])
        .output()
        .unwrap();
    assert!(result.status.success());
    let report: serde_json::Value = serde_json::from_slice(&result.stdout).unwrap();
    assert_eq!(report["format"], "deflate");
    assert_eq!(report["chunk_size"], 65_536);
}

#[test]
fn benchmark_cascaded_keeps_its_own_defaults() {
    let exe = env!("CARGO_BIN_EXE_benchmark_hlif");
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("data.bin");
    fs::write(&input, sample()).unwrap();

    let report = |extra: &[&str]| -> serde_json::Value {
        let result = Command::new(exe)
            .args(["cascaded", "-f", input.to_str().unwrap(), "--json"])
            .args(extra)
            .output()
            .unwrap();
        assert!(result.status.success(), "{extra:?}");
        serde_json::from_slice(&result.stdout).unwrap()
    };
    assert_eq!(report(&[])["chunk_size"], 4096);
    assert_eq!(report(&["-c", "8192"])["chunk_size"], 8192);

    let report = Command::new(env!("CARGO_BIN_EXE_benchmark_hlif"))
        .args(["lz4", "-f", input.to_str().unwrap(), "--json"])
        .output()
        .unwrap();
    let report: serde_json::Value = serde_json::from_slice(&report.stdout).unwrap();
    assert_eq!(report["chunk_size"], 65_536);
}

#[test]
fn benchmark_usage_errors_exit_one() {
    let exe = env!("CARGO_BIN_EXE_benchmark_hlif");
    let cases: [&[&str]; 5] = [
        &[],
        &["zstd", "-f", "x"],
        &["snappy"],
        &["snappy", "-f", "x", "-t", "float"],
        &["snappy", "-f", "x", "-n", "0"],
    ];
    for args in cases {
        let status = Command::new(exe).args(args).status().unwrap();
        assert_eq!(status.code(), Some(1), "{args:?}");
    }
}
