// tools module

pub mod profiler;
