xflags::xflags! {
    /// Batch jobs of the saju service: day pillar calendar and daily fortune refresh.
    cmd saju-batch {
        /// Runs the scheduler and the admin HTTP API.
        default cmd serve {
            /// Overrides HTTP_PORT.
            optional -p, --port port: u16
        }
        /// Generates day pillars once and exits.
        cmd calendar {
            /// Number of days starting today.
            optional --days days: u32
        }
        /// Refreshes fortunes of all active users once and exits.
        cmd fortune {
            /// Target date as YYYY-MM-DD, today when omitted.
            optional --date date: String
            /// Regenerates fortunes that already exist.
            optional --force
        }
    }
}
