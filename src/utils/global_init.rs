use env_logger::Env;
use log::LevelFilter;

pub fn setup_logger(filter_level: LevelFilter) {
  env_logger::Builder::from_env(Env::default().default_filter_or("warn"))
    .filter_level(filter_level)
    .try_init()
    .ok();
}

pub fn global_init() {
  setup_logger(LevelFilter::Warn);
}
