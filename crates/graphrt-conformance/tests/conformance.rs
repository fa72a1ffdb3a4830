use graphrt::{Runtime, RuntimeConfig};
use graphrt_conformance::define_conformance_tests;

fn single_device() -> Runtime {
    Runtime::with_config(RuntimeConfig::default())
}

fn dual_device() -> Runtime {
    Runtime::with_config(RuntimeConfig::default().with_device_count(2))
}

define_conformance_tests!(single_device_runtime, super::single_device);
define_conformance_tests!(dual_device_runtime, super::dual_device);
