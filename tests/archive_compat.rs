mod common;
use common::{fast_options, TestEnv};
use std::fs::File;
use std::io::Read;

fn payloads() -> Vec<Vec<u8>> {
  vec![
    b"first".to_vec(),
    Vec::new(),
    vec![0xAB; 512],
    (0..1300).map(|i| (i % 251) as u8).collect(),
  ]
}

#[tokio::test]
async fn test_log_reads_as_tar_archive() {
  let env = TestEnv::new(fast_options()).await;
  let payloads = payloads();
  for payload in &payloads {
    env.tape.append(payload.clone()).await.unwrap();
  }
  env.tape.close().await.unwrap();

  let mut archive = tar::Archive::new(File::open(&env.path).unwrap());
  let mut seen = 0;
  for (i, entry) in archive.entries().unwrap().enumerate() {
    let mut entry = entry.unwrap();
    let expected_name = format!("{:016}.entry", i + 1);

    assert_eq!(entry.path().unwrap().to_str().unwrap(), expected_name);
    assert_eq!(entry.header().entry_type(), tar::EntryType::Regular);
    assert_eq!(entry.header().mode().unwrap(), 0o400);
    assert_eq!(entry.header().uid().unwrap(), 1000);
    assert_eq!(entry.header().gid().unwrap(), 1000);
    assert_eq!(entry.header().username().unwrap(), Some("microtape"));
    assert_eq!(entry.header().size().unwrap(), payloads[i].len() as u64);
    assert!(entry.header().mtime().unwrap() > 0);

    let mut content = Vec::new();
    entry.read_to_end(&mut content).unwrap();
    assert_eq!(content, payloads[i]);
    seen += 1;
  }
  assert_eq!(seen, payloads.len());
}

#[tokio::test]
async fn test_log_unpacks_to_directory() {
  let env = TestEnv::new(fast_options()).await;
  let payloads = payloads();
  for payload in &payloads {
    env.tape.append(payload.clone()).await.unwrap();
  }
  env.tape.close().await.unwrap();

  let out = tempfile::tempdir().unwrap();
  tar::Archive::new(File::open(&env.path).unwrap()).unpack(out.path()).unwrap();

  for (i, payload) in payloads.iter().enumerate() {
    let file = out.path().join(format!("{:016}.entry", i + 1));
    assert_eq!(&std::fs::read(&file).unwrap(), payload);
  }
}
