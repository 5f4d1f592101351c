pub(crate) mod dispatch;

pub(crate) use dispatch::dispatch;

use corral_lib::Dispatcher;

use crate::options::Config;

/// Parameters passed to every command
pub(crate) struct CommandParams {
    pub(crate) dispatcher: Dispatcher,
    pub(crate) requests: Vec<String>,
    pub(crate) cfg: Config,
}
