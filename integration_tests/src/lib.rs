pub mod sim_esc;
pub mod test_od;
pub mod utils;

pub mod prelude {
    pub use super::sim_esc::SimEsc;
    pub use super::test_od::{
        bench, TestBench, BLOB_INDEX, CONTROL_WORD_INDEX, POSITION_INDEX, STATUS_WORD_INDEX,
        TARGET_INDEX,
    };
    pub use super::utils::{check_abort, default_sm_setup, Master};
    pub use drivecat_common::al::{AlState, AlStatusCode};
    pub use drivecat_common::coe::AbortCode;
    pub use drivecat_slave::{CallbackResult, Callbacks, CyclicTask, Slave, SlaveConfig};
}
