use cmap_config::schema::AgencySection;
use cmap_core::{AgencyError, AgencyId, InstanceId, MasId, Result};

/// The three ids that place an agency inside the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostIds {
    pub mas_id: MasId,
    pub instance_id: InstanceId,
    pub agency_id: AgencyId,
}

/// Parse `mas-{masid}-im-{imid}-agency-{agencyid}`. Trailing segments are ignored.
pub fn parse_hostname(hostname: &str) -> Result<HostIds> {
    let parts: Vec<&str> = hostname.split('-').collect();
    if parts.len() < 6 {
        return Err(AgencyError::Bootstrap(format!(
            "host name '{hostname}' does not look like mas-<id>-im-<id>-agency-<id>"
        )));
    }
    let field = |idx: usize, what: &str| -> Result<i32> {
        parts[idx].parse::<i32>().map_err(|_| {
            AgencyError::Bootstrap(format!(
                "host name '{hostname}': {what} '{}' is not a number",
                parts[idx]
            ))
        })
    };
    Ok(HostIds {
        mas_id: field(1, "mas id")?,
        instance_id: field(3, "image group id")?,
        agency_id: field(5, "agency id")?,
    })
}

/// Fully qualified agency name as registered with the directory.
pub fn agency_name(hostname: &str, mas_id: MasId) -> String {
    format!("{hostname}.mas{mas_id}agencies")
}

pub fn local_hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

/// Host name and ids of this agency. Config overrides win; the host name
/// only has to parse when at least one id is missing from the config.
pub fn resolve(section: &AgencySection) -> Result<(String, HostIds)> {
    let hostname = section.hostname.clone().unwrap_or_else(local_hostname);
    let ids = match (section.mas_id, section.instance_id, section.agency_id) {
        (Some(mas_id), Some(instance_id), Some(agency_id)) => HostIds {
            mas_id,
            instance_id,
            agency_id,
        },
        (mas_id, instance_id, agency_id) => {
            let parsed = parse_hostname(&hostname)?;
            HostIds {
                mas_id: mas_id.unwrap_or(parsed.mas_id),
                instance_id: instance_id.unwrap_or(parsed.instance_id),
                agency_id: agency_id.unwrap_or(parsed.agency_id),
            }
        }
    };
    Ok((hostname, ids))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_platform_hostname() {
        let ids = parse_hostname("mas-3-im-1-agency-7").unwrap();
        assert_eq!(
            ids,
            HostIds {
                mas_id: 3,
                instance_id: 1,
                agency_id: 7
            }
        );
    }

    #[test]
    fn test_parse_tolerates_suffix() {
        let ids = parse_hostname("mas-3-im-1-agency-7-x2f").unwrap();
        assert_eq!(ids.agency_id, 7);
    }

    #[test]
    fn test_parse_rejects_short_and_non_numeric() {
        assert!(matches!(
            parse_hostname("workstation").unwrap_err(),
            AgencyError::Bootstrap(_)
        ));
        assert!(parse_hostname("mas-a-im-1-agency-2").is_err());
    }

    #[test]
    fn test_agency_name_format() {
        assert_eq!(
            agency_name("mas-3-im-1-agency-7", 3),
            "mas-3-im-1-agency-7.mas3agencies"
        );
    }

    #[test]
    fn test_config_ids_skip_hostname_parsing() {
        let section = AgencySection {
            hostname: Some("laptop".into()),
            mas_id: Some(1),
            instance_id: Some(0),
            agency_id: Some(4),
            ..AgencySection::default()
        };
        let (hostname, ids) = resolve(&section).unwrap();
        assert_eq!(hostname, "laptop");
        assert_eq!(ids.agency_id, 4);
    }

    #[test]
    fn test_partial_override_applies_on_top_of_hostname() {
        let section = AgencySection {
            hostname: Some("mas-3-im-1-agency-7".into()),
            agency_id: Some(9),
            ..AgencySection::default()
        };
        let (_, ids) = resolve(&section).unwrap();
        assert_eq!(ids.mas_id, 3);
        assert_eq!(ids.agency_id, 9);
    }
}
