pub(crate) mod asr;
pub(crate) mod chat;
pub(crate) mod meta;
pub(crate) mod patch;
pub(crate) mod test_run;
