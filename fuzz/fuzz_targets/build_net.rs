#![no_main]
use bpmc_kripke::{ConvertConfig, Converter, StutterOptimizer};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(net) = bpmc_net::PetriNet::from_json(s) {
            let config = ConvertConfig {
                max_states: 2_000,
                num_threads: 1,
                ..ConvertConfig::default()
            };
            if let Ok(mut structure) = Converter::new(&net, config).convert() {
                let report = StutterOptimizer::default()
                    .optimize(&mut structure)
                    .expect("reduction of a built structure must succeed");
                assert_eq!(report.states_after, structure.len());
                let _ = bpmc_smv::encode(&structure, Default::default());
            }
        }
    }
});
