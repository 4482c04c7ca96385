use pixfed_lib::{
    FEDCard,
    PrintLevel,
    SettingsError,
};

#[test]
fn write_read_config_file() {
  let mut card = FEDCard::new();
  card.fed_id              = 1294;
  card.channel_enable_mask = 0xffff_0000_ffff;
  card.print_level         = PrintLevel::ParamTrace;
  card.auto_degrade        = true;
  card.timing.ttc_clock_delay = 7;
  let fname = std::env::temp_dir().join("pixfed-card-test.toml");
  let fname = String::from(fname.to_string_lossy());
  card.to_toml(fname.clone()).unwrap();
  let test = FEDCard::from_toml(&fname).unwrap();
  assert_eq!(card, test);
  let _ = std::fs::remove_file(&fname);
}

#[test]
fn write_read_json_file() {
  let mut card = FEDCard::new();
  card.seu_threshold = 3;
  card.fitel_verify  = false;
  let fname = std::env::temp_dir().join("pixfed-card-test.json");
  let fname = String::from(fname.to_string_lossy());
  card.to_json(fname.clone()).unwrap();
  let test = FEDCard::from_file(&fname).unwrap();
  assert_eq!(card, test);
  let _ = std::fs::remove_file(&fname);
}

#[test]
fn read_missing_file() {
  assert_eq!(FEDCard::from_toml("/this/does/not/exist.toml"), Err(SettingsError::IOError));
}

#[test]
fn read_garbage_toml() {
  let fname = std::env::temp_dir().join("pixfed-card-garbage.toml");
  std::fs::write(&fname, "fed_id = \"not a number\"\n").unwrap();
  let fname = String::from(fname.to_string_lossy());
  assert_eq!(FEDCard::from_toml(&fname), Err(SettingsError::TomlDecodingError));
  let _ = std::fs::remove_file(&fname);
}
