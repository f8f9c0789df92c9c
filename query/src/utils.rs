pub const FILE_STRFTIME: &str = "%Y-%m-%d-%H-%M-%S.%3f%z";
